use crate::config::{Config, Mode};
use dwell_core::guard::GuardPermit;
use dwell_core::job::{CaptureJob, CaptureProvider, JobRunner, ReportSender};
use dwell_core::pipeline::{CaptureDispatcher, DispatchError};
use dwell_core::process::{LocalMatchProcessor, SnapshotProcessor};
use dwell_core::store::{ProfileStore, SqliteKvStore, StoreError};
use dwell_core::upload::{UploadError, ViewerUploader};
use dwell_core::{EventLog, StoredProfile};
use dwell_hw::{Camera, CameraConfig, CameraError, SyntheticCapture};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("profile store error: {0}")]
    Store(#[from] StoreError),
    #[error("uploader error: {0}")]
    Upload(#[from] UploadError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Capture {
        job: CaptureJob,
        permit: GuardPermit,
    },
    Profiles {
        reply: oneshot::Sender<Vec<StoredProfile>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    job_noun: &'static str,
}

impl EngineHandle {
    /// "embedding" or "upload", depending on the processor the engine runs.
    pub fn job_noun(&self) -> &'static str {
        self.job_noun
    }

    /// Snapshot of the stored profile collection. Waits behind a running job.
    pub async fn profiles(&self) -> Result<Vec<StoredProfile>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Profiles { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Never waits: a full queue is reported as busy and the permit goes back.
impl CaptureDispatcher for EngineHandle {
    fn dispatch(&mut self, job: CaptureJob, permit: GuardPermit) -> Result<(), DispatchError> {
        self.tx
            .try_send(EngineRequest::Capture { job, permit })
            .map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::Busy,
                TrySendError::Closed(_) => DispatchError::Unavailable,
            })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The capture provider and the processor are built on that thread (the
/// blocking HTTP client must not live inside the async runtime). The returned
/// future resolves once they are ready, so a missing camera or unreadable
/// database fails fast without blocking the runtime.
pub async fn spawn_engine(
    config: Config,
    log: EventLog,
    reports: ReportSender,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (init_tx, init_rx) = oneshot::channel::<Result<&'static str, EngineError>>();

    std::thread::Builder::new()
        .name("dwell-engine".into())
        .spawn(move || {
            let mut runner = match build_runner(&config, &log) {
                Ok(runner) => runner.with_reports(reports),
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };
            let _ = init_tx.send(Ok(runner.processor().job_noun()));

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture { job, permit } => {
                        let Some(work) = runner.capture(job, permit) else {
                            continue;
                        };
                        // Processing is the slow half; serve anything already queued first.
                        while let Ok(pending) = rx.try_recv() {
                            serve(&mut runner, pending);
                        }
                        runner.process(work);
                    }
                    other => serve(&mut runner, other),
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    let job_noun = init_rx.await.map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx, job_noun })
}

fn serve(runner: &mut JobRunner, req: EngineRequest) {
    match req {
        EngineRequest::Capture { job, permit } => {
            runner.run(job, permit);
        }
        EngineRequest::Profiles { reply } => {
            let _ = reply.send(runner.processor().profiles());
        }
    }
}

fn build_runner(config: &Config, log: &EventLog) -> Result<JobRunner, EngineError> {
    let capture: Box<dyn CaptureProvider> = if config.uses_synthetic_camera() {
        Box::new(SyntheticCapture::new(&config.capture_dir)?)
    } else {
        Box::new(Camera::open(CameraConfig {
            device_path: config.camera_device.clone(),
            capture_dir: config.capture_dir.clone(),
            width: config.camera_width,
            height: config.camera_height,
            timeout: config.capture_timeout(),
        })?)
    };

    let processor: Box<dyn SnapshotProcessor> = match config.mode {
        Mode::Local => {
            let kv = SqliteKvStore::open(&config.db_path)?;
            let (store, status) = ProfileStore::load(kv, config.match_threshold);
            log.push(status.describe());
            tracing::info!(path = %config.db_path.display(), ?status, "profile database opened");
            Box::new(LocalMatchProcessor::new(store))
        }
        Mode::Upload => Box::new(ViewerUploader::new(config.upload_config())?),
    };

    Ok(JobRunner::new(capture, processor, log.clone()))
}
