//! Processing step for captured snapshots.

use crate::embedding::{capture_descriptor, deterministic_embedding};
use crate::job::{CaptureJob, CapturedArtifact};
use crate::log::EventLog;
use crate::store::{KvStore, ProfileStore};
use crate::types::{CosineMatcher, MatchReport, StoredProfile};
use crate::upload::UploadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("upload: {0}")]
    Upload(#[from] UploadError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Consumes a captured artifact. Runs on the job lane, never on the frame loop.
pub trait SnapshotProcessor: Send {
    /// Noun used in operator log lines ("embedding", "upload").
    fn job_noun(&self) -> &'static str;

    fn process(
        &mut self,
        artifact: &CapturedArtifact,
        job: &CaptureJob,
        log: &EventLog,
    ) -> Result<(), ProcessError>;

    /// Profiles known to this processor, if it keeps any.
    fn profiles(&self) -> Vec<StoredProfile> {
        Vec::new()
    }
}

/// Local-matching variant: placeholder embedding + cosine match against a
/// persisted profile collection.
pub struct LocalMatchProcessor<S: KvStore> {
    store: ProfileStore<S>,
}

impl<S: KvStore> LocalMatchProcessor<S> {
    pub fn new(store: ProfileStore<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ProfileStore<S> {
        &self.store
    }

    /// Embed the capture descriptor and match it. Logs the result line.
    pub fn match_capture(
        &mut self,
        artifact: &CapturedArtifact,
        job: &CaptureJob,
        log: &EventLog,
    ) -> Result<MatchReport, ProcessError> {
        let source = capture_descriptor(&artifact.path.to_string_lossy(), job.bounds, job.elapsed_ms)?;
        let embedding = deterministic_embedding(&source);
        let outcome = self.store.match_or_enroll(embedding, &CosineMatcher);

        if outcome.persist_error.is_some() {
            log.push("Failed to save embeddings (see console)");
        }

        let report = outcome.report;
        if report.is_new {
            log.push(format!(
                "Stored new user ({}). Total profiles: {}",
                report.id, report.total
            ));
        } else {
            let score = report
                .similarity
                .map(|s| format!("{s:.3}"))
                .unwrap_or_else(|| "n/a".to_string());
            log.push(format!("Matched existing user ({}) with similarity {score}", report.id));
        }
        Ok(report)
    }
}

impl<S: KvStore> SnapshotProcessor for LocalMatchProcessor<S> {
    fn job_noun(&self) -> &'static str {
        "embedding"
    }

    fn process(
        &mut self,
        artifact: &CapturedArtifact,
        job: &CaptureJob,
        log: &EventLog,
    ) -> Result<(), ProcessError> {
        log.push("Processing embedding job…");
        let report = self.match_capture(artifact, job, log)?;
        tracing::info!(
            id = %report.id,
            is_new = report.is_new,
            similarity = ?report.similarity,
            total = report.total,
            session = %job.session_id,
            "embedding matched"
        );
        Ok(())
    }

    fn profiles(&self) -> Vec<StoredProfile> {
        self.store.profiles().to_vec()
    }
}
