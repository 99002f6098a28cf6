//! Capture jobs: capture an artifact, process it, clean it up.
//!
//! A job is split into two phases so the host can run processing after any
//! work that queued up behind the capture. The [`GuardPermit`] moves from
//! phase to phase and is dropped when the job ends, whichever way it ends.

use crate::guard::GuardPermit;
use crate::log::EventLog;
use crate::pipeline::{capitalize, CaptureDispatcher, DispatchError};
use crate::process::SnapshotProcessor;
use crate::tracker::QualifiedSession;
use crate::types::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device: {0}")]
    Device(Box<dyn std::error::Error + Send + Sync>),
    #[error("capture timed out after {0} ms")]
    TimedOut(u64),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// An image written by a capture provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedArtifact {
    pub path: PathBuf,
}

/// Produces an image artifact from the live feed.
pub trait CaptureProvider: Send {
    /// `Ok(None)` means the provider ran but produced no file.
    fn capture(&mut self) -> Result<Option<CapturedArtifact>, CaptureError>;
}

/// Everything a job needs to know about the session that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureJob {
    pub session_id: Uuid,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub elapsed_ms: i64,
    pub bounds: Option<Rect>,
}

impl From<QualifiedSession> for CaptureJob {
    fn from(q: QualifiedSession) -> Self {
        Self {
            session_id: q.session_id,
            started_at_ms: q.started_at_ms,
            ended_at_ms: q.observed_at_ms,
            elapsed_ms: q.elapsed_ms,
            bounds: q.bounds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    CaptureFailed,
    ProcessFailed,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, JobOutcome::Completed)
    }
}

/// Sent back to the frame loop when a job finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub session_id: Uuid,
    pub outcome: JobOutcome,
}

pub type ReportSender = mpsc::UnboundedSender<JobReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<JobReport>;

pub fn report_channel() -> (ReportSender, ReportReceiver) {
    mpsc::unbounded_channel()
}

/// A captured artifact waiting for processing. Holds the guard.
#[derive(Debug)]
pub struct CapturedWork {
    pub artifact: CapturedArtifact,
    pub job: CaptureJob,
    permit: GuardPermit,
}

/// Owns the capture provider and the processor; runs jobs on one lane.
pub struct JobRunner {
    capture: Box<dyn CaptureProvider>,
    processor: Box<dyn SnapshotProcessor>,
    log: EventLog,
    reports: Option<ReportSender>,
}

impl JobRunner {
    pub fn new(
        capture: Box<dyn CaptureProvider>,
        processor: Box<dyn SnapshotProcessor>,
        log: EventLog,
    ) -> Self {
        Self {
            capture,
            processor,
            log,
            reports: None,
        }
    }

    /// Send a [`JobReport`] for every finished job.
    pub fn with_reports(mut self, reports: ReportSender) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn processor(&self) -> &dyn SnapshotProcessor {
        self.processor.as_ref()
    }

    /// Phase one: grab an image. On failure the permit is released here.
    pub fn capture(&mut self, job: CaptureJob, permit: GuardPermit) -> Option<CapturedWork> {
        self.log.push(format!(
            "Capturing frame after {:.1}s session",
            job.elapsed_ms as f64 / 1000.0
        ));

        match self.capture.capture() {
            Ok(Some(artifact)) => {
                tracing::debug!(path = %artifact.path.display(), session = %job.session_id, "captured artifact");
                self.log
                    .push(format!("Queued {} processing", self.processor.job_noun()));
                Some(CapturedWork {
                    artifact,
                    job,
                    permit,
                })
            }
            Ok(None) => {
                self.log.push("Capture returned no file path");
                self.finish(&job, JobOutcome::CaptureFailed, permit);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, session = %job.session_id, "capture error");
                self.log.push("Capture failed (see console)");
                self.finish(&job, JobOutcome::CaptureFailed, permit);
                None
            }
        }
    }

    /// Phase two: process the artifact, then delete it. Releases the permit.
    pub fn process(&mut self, work: CapturedWork) -> JobOutcome {
        let CapturedWork {
            artifact,
            job,
            permit,
        } = work;

        let outcome = match self.processor.process(&artifact, &job, &self.log) {
            Ok(()) => JobOutcome::Completed,
            Err(e) => {
                tracing::warn!(error = %e, session = %job.session_id, "processing error");
                self.log.push(format!(
                    "{} processing failed (see console)",
                    capitalize(self.processor.job_noun())
                ));
                JobOutcome::ProcessFailed
            }
        };

        match remove_artifact(&artifact.path) {
            Ok(()) => self.log.push("Cleaned temporary capture"),
            Err(e) => tracing::warn!(error = %e, path = %artifact.path.display(), "cleanup error"),
        }

        self.finish(&job, outcome, permit);
        outcome
    }

    /// Run both phases back to back.
    pub fn run(&mut self, job: CaptureJob, permit: GuardPermit) -> JobOutcome {
        match self.capture(job, permit) {
            Some(work) => self.process(work),
            None => JobOutcome::CaptureFailed,
        }
    }

    fn finish(&self, job: &CaptureJob, outcome: JobOutcome, permit: GuardPermit) {
        drop(permit);
        tracing::info!(session = %job.session_id, ?outcome, "capture job finished");
        if let Some(reports) = &self.reports {
            // The frame loop may already be gone during shutdown.
            let _ = reports.send(JobReport {
                session_id: job.session_id,
                outcome,
            });
        }
    }
}

/// Runs each job to completion inside the dispatch call.
impl CaptureDispatcher for JobRunner {
    fn dispatch(&mut self, job: CaptureJob, permit: GuardPermit) -> Result<(), DispatchError> {
        self.run(job, permit);
        Ok(())
    }
}

/// Delete a temporary artifact. A file that is already gone counts as deleted.
pub fn remove_artifact(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
