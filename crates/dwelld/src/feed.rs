//! Detection feed on stdin, one JSON line per frame.
//! Frames without `t_ms` are stamped on arrival by the frame loop.

use dwell_core::feed::{parse_line, DetectionFrame};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Forward parsed frames from `reader` until EOF or until the receiver is gone.
/// Malformed lines are logged and skipped.
pub async fn forward_frames<R>(reader: R, tx: mpsc::Sender<DetectionFrame>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(&line) {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping malformed detection line"),
        }
    }
    Ok(())
}

/// Read the feed from stdin on a background task. The channel closes at EOF.
pub fn spawn_stdin_feed(tx: mpsc::Sender<DetectionFrame>) {
    tokio::spawn(async move {
        if let Err(e) = forward_frames(BufReader::new(tokio::io::stdin()), tx).await {
            tracing::error!(error = %e, "detection feed read failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_skips_bad_lines() {
        let input = "{\"faces\":[]}\nnot json\n\n{\"faces\":[{\"x\":0,\"y\":0,\"width\":1,\"height\":1}]}\n";
        let (tx, mut rx) = mpsc::channel(8);
        forward_frames(input.as_bytes(), tx).await.unwrap();

        assert!(rx.recv().await.unwrap().faces.is_empty());
        assert_eq!(rx.recv().await.unwrap().faces.len(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_stops_when_receiver_dropped() {
        let input = "{}\n{}\n{}\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        forward_frames(input.as_bytes(), tx).await.unwrap();
    }
}
