//! Offline replay of a recorded detection trace.
//!
//! Drives the same pipeline as the daemon, with jobs run inline, synthetic
//! capture and local matching against the given database.

use anyhow::{Context, Result};
use dwell_core::feed::parse_line;
use dwell_core::log::LogEntry;
use dwell_core::store::{ProfileStore, SqliteKvStore};
use dwell_core::{DwellPipeline, EventLog, JobRunner, LocalMatchProcessor, StoredProfile, TrackerConfig};
use dwell_hw::SyntheticCapture;
use std::path::{Path, PathBuf};

/// Enough to keep every line of a long trace.
const REPLAY_LOG_CAPACITY: usize = 10_000;

pub struct ReplayOptions {
    pub trace: PathBuf,
    pub db: PathBuf,
    pub capture_dir: PathBuf,
    pub threshold_ms: i64,
    pub match_threshold: f32,
}

pub struct ReplaySummary {
    pub frames: usize,
    pub skipped_lines: usize,
    /// Oldest first.
    pub log: Vec<LogEntry>,
    pub profiles: Vec<StoredProfile>,
}

/// Replay `options.trace`. Frames without `t_ms` reuse the previous frame's
/// timestamp; the trace is closed with an empty frame at the last timestamp.
pub fn run(options: &ReplayOptions) -> Result<ReplaySummary> {
    let raw = std::fs::read_to_string(&options.trace)
        .with_context(|| format!("reading trace {}", options.trace.display()))?;

    let log = EventLog::with_capacity(REPLAY_LOG_CAPACITY);
    let mut pipeline = build_pipeline(options, &log)?;

    let mut frames = 0;
    let mut skipped_lines = 0;
    let mut last_ms = 0;
    for (line_no, line) in raw.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(frame)) => {
                last_ms = frame.timestamp_or(last_ms);
                pipeline.on_detection(&frame.detections(), last_ms);
                frames += 1;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed trace line");
                skipped_lines += 1;
            }
        }
    }
    pipeline.on_detection(&[], last_ms);

    let mut entries = log.entries();
    entries.reverse();
    Ok(ReplaySummary {
        frames,
        skipped_lines,
        log: entries,
        profiles: pipeline.dispatcher().processor().profiles(),
    })
}

fn build_pipeline(options: &ReplayOptions, log: &EventLog) -> Result<DwellPipeline<JobRunner>> {
    let capture = SyntheticCapture::new(&options.capture_dir)
        .with_context(|| format!("creating capture dir {}", options.capture_dir.display()))?;
    let kv = open_db(&options.db)?;
    let (store, status) = ProfileStore::load(kv, options.match_threshold);
    log.push(status.describe());

    let runner = JobRunner::new(
        Box::new(capture),
        Box::new(LocalMatchProcessor::new(store)),
        log.clone(),
    );
    let config = TrackerConfig {
        session_threshold_ms: options.threshold_ms,
        ..TrackerConfig::default()
    };
    Ok(DwellPipeline::new(config, runner, log.clone()))
}

fn open_db(path: &Path) -> Result<SqliteKvStore> {
    SqliteKvStore::open(path).with_context(|| format!("opening database {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwell_core::store::DEFAULT_MATCH_THRESHOLD;

    fn options(dir: &Path, trace: &str) -> ReplayOptions {
        let trace_path = dir.join("trace.jsonl");
        std::fs::write(&trace_path, trace).unwrap();
        ReplayOptions {
            trace: trace_path,
            db: dir.join("profiles.db"),
            capture_dir: dir.join("captures"),
            threshold_ms: 3000,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    const FACE: &str = r#"{"x":10,"y":20,"width":100,"height":120}"#;

    fn frame(t_ms: i64, faces: bool) -> String {
        if faces {
            format!("{{\"faces\":[{FACE}],\"t_ms\":{t_ms}}}\n")
        } else {
            format!("{{\"faces\":[],\"t_ms\":{t_ms}}}\n")
        }
    }

    #[test]
    fn test_replay_enrolls_long_session() {
        let dir = tempfile::tempdir().unwrap();
        let trace = [frame(0, true), frame(1500, true), frame(3200, false)].concat();
        let summary = run(&options(dir.path(), &trace)).unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.profiles.len(), 1);
        let messages: Vec<_> = summary.log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages[0], "No stored embeddings yet");
        assert!(messages.contains(&"Face kept for 3.2s, capturing frame"));
        assert!(messages.iter().any(|m| m.starts_with("Stored new user (user-")));
        assert_eq!(*messages.last().unwrap(), "Cleaned temporary capture");
    }

    #[test]
    fn test_replay_discards_short_session() {
        let dir = tempfile::tempdir().unwrap();
        let trace = [frame(0, true), frame(2999, false)].concat();
        let summary = run(&options(dir.path(), &trace)).unwrap();

        assert!(summary.profiles.is_empty());
        assert_eq!(
            summary.log.last().unwrap().message,
            "Discarded short session (3.0s < 3s)"
        );
    }

    #[test]
    fn test_replay_closes_trailing_session() {
        let dir = tempfile::tempdir().unwrap();
        let trace = [frame(0, true), frame(4000, true), "not json\n".to_string()].concat();
        let summary = run(&options(dir.path(), &trace)).unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.skipped_lines, 1);
        assert_eq!(summary.profiles.len(), 1);
    }

    #[test]
    fn test_replay_persists_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let trace = [frame(0, true), frame(5000, false)].concat();
        let opts = options(dir.path(), &trace);

        run(&opts).unwrap();
        let second = run(&opts).unwrap();
        assert_eq!(second.log[0].message, "Loaded 1 stored embedding");
    }

    #[test]
    fn test_missing_trace_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), "");
        opts.trace = dir.path().join("nope.jsonl");
        assert!(run(&opts).is_err());
    }
}
