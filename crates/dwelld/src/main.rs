use anyhow::Result;
use dwell_core::job::report_channel;
use dwell_core::{DwellPipeline, EventLog};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod feed;

use config::Config;
use dbus_interface::{DwellService, LoopCommand, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("dwelld starting");

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        mode = ?config.mode,
        threshold_ms = config.session_threshold_ms,
        "configuration loaded"
    );

    let log = EventLog::with_capacity(config.log_capacity);
    let (report_tx, report_rx) = report_channel();
    let engine = engine::spawn_engine(config.clone(), log.clone(), report_tx).await?;
    log.push("Camera ready");

    let mut pipeline = DwellPipeline::new(config.tracker_config(), engine.clone(), log.clone())
        .with_reports(report_rx)
        .with_job_noun(engine.job_noun());

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<LoopCommand>(8);
    let service = DwellService::new(cmd_tx, engine, log.clone(), config.mode);
    // The tracker still runs without a session bus; only remote control is lost.
    let _connection = match serve_dbus(service).await {
        Ok(conn) => {
            tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
            Some(conn)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; running without remote control");
            None
        }
    };

    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    feed::spawn_stdin_feed(frame_tx);
    let mut feed_open = true;
    let mut last_frame_ms = None;

    tracing::info!("dwelld ready");

    loop {
        tokio::select! {
            frame = frame_rx.recv(), if feed_open => match frame {
                Some(frame) => {
                    let now_ms = frame.timestamp_or(chrono::Utc::now().timestamp_millis());
                    last_frame_ms = Some(now_ms);
                    pipeline.on_detection(&frame.detections(), now_ms);
                }
                None => {
                    tracing::info!("detection feed closed");
                    feed_open = false;
                    // No more frames: whoever was in view has left.
                    let now_ms = last_frame_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                    pipeline.on_detection(&[], now_ms);
                }
            },
            Some(cmd) = cmd_rx.recv() => match cmd {
                LoopCommand::Snapshot { reply } => {
                    let _ = reply.send(pipeline.snapshot());
                }
                LoopCommand::Reset { reply } => {
                    pipeline.reset();
                    let _ = reply.send(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("dwelld shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn serve_dbus(service: DwellService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
}
