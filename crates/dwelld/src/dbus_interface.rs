use crate::config::Mode;
use crate::engine::EngineHandle;
use dwell_core::{EventLog, PipelineSnapshot};
use tokio::sync::{mpsc, oneshot};
use zbus::interface;

pub const BUS_NAME: &str = "org.dwell.Tracker1";
pub const OBJECT_PATH: &str = "/org/dwell/Tracker1";

/// Requests served by the frame loop, which owns the pipeline.
pub enum LoopCommand {
    Snapshot {
        reply: oneshot::Sender<PipelineSnapshot>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// D-Bus interface for the dwell tracker daemon.
///
/// Bus name: org.dwell.Tracker1
/// Object path: /org/dwell/Tracker1
pub struct DwellService {
    commands: mpsc::Sender<LoopCommand>,
    engine: EngineHandle,
    log: EventLog,
    mode: Mode,
}

impl DwellService {
    pub fn new(
        commands: mpsc::Sender<LoopCommand>,
        engine: EngineHandle,
        log: EventLog,
        mode: Mode,
    ) -> Self {
        Self {
            commands,
            engine,
            log,
            mode,
        }
    }

    async fn snapshot(&self) -> zbus::fdo::Result<PipelineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LoopCommand::Snapshot { reply })
            .await
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())
    }
}

fn loop_gone() -> zbus::fdo::Error {
    zbus::fdo::Error::Failed("frame loop is not running".into())
}

#[interface(name = "org.dwell.Tracker1")]
impl DwellService {
    /// Presence, last duration and capture state as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snap = self.snapshot().await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": match self.mode {
                Mode::Local => "local",
                Mode::Upload => "upload",
            },
            "face_present": snap.face_present,
            "status": snap.status_message,
            "last_duration": snap.last_duration,
            "session_started_at_ms": snap.session_started_at_ms,
            "last_bounds": snap.last_bounds,
            "capture_in_flight": snap.capture_in_flight,
        })
        .to_string())
    }

    /// Operator log, most recent first.
    async fn recent_logs(&self) -> Vec<String> {
        self.log.entries().iter().map(ToString::to_string).collect()
    }

    /// Stored profiles as a JSON array. Empty in upload mode.
    async fn list_profiles(&self) -> zbus::fdo::Result<String> {
        let profiles = self
            .engine
            .profiles()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&profiles).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Close any open session.
    async fn reset(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("reset requested");
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LoopCommand::Reset { reply })
            .await
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())?;
        Ok(true)
    }
}
