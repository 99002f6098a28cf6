//! Remote-upload variant: POST the captured snapshot to the viewer endpoint.

use crate::job::{CaptureJob, CapturedArtifact};
use crate::log::EventLog;
use crate::process::{ProcessError, SnapshotProcessor};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const VIEWER_PATH: &str = "/api/v1/viewer";
pub const DEFAULT_ORG_ID: &str = "default_org";
pub const DEFAULT_MIN_DURATION_SECS: i64 = 3;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("failed to read capture: {0}")]
    ReadArtifact(#[from] std::io::Error),
    #[error("invalid session timestamp: {0}")]
    Timestamp(i64),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(StatusCode),
}

/// JSON body of `POST /api/v1/viewer`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerPayload {
    pub image_base64: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: i64,
    pub org_id: String,
}

impl ViewerPayload {
    pub fn build(
        image: &[u8],
        job: &CaptureJob,
        org_id: &str,
        min_duration_secs: i64,
    ) -> Result<Self, UploadError> {
        Ok(Self {
            image_base64: STANDARD.encode(image),
            start_time: rfc3339_millis(job.started_at_ms)?,
            end_time: rfc3339_millis(job.ended_at_ms)?,
            duration: (job.elapsed_ms / 1000).max(min_duration_secs),
            org_id: org_id.to_string(),
        })
    }
}

fn rfc3339_millis(epoch_ms: i64) -> Result<String, UploadError> {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or(UploadError::Timestamp(epoch_ms))
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Scheme + host (+ optional prefix) of the analytics API.
    pub api_base: String,
    pub org_id: String,
    pub timeout: Duration,
    pub min_duration_secs: i64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            org_id: DEFAULT_ORG_ID.to_string(),
            timeout: Duration::from_secs(10),
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
        }
    }
}

impl UploadConfig {
    pub fn endpoint(&self) -> String {
        format!("{}{VIEWER_PATH}", self.api_base.trim_end_matches('/'))
    }
}

/// Uploads one snapshot per job. No retry here: a failed job re-arms the
/// tracker instead.
pub struct ViewerUploader {
    client: Client,
    config: UploadConfig,
}

impl ViewerUploader {
    pub fn new(config: UploadConfig) -> Result<Self, UploadError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        tracing::info!(endpoint = %config.endpoint(), org_id = %config.org_id, "viewer uploader ready");
        Ok(Self { client, config })
    }

    pub fn send(&self, payload: &ViewerPayload) -> Result<StatusCode, UploadError> {
        let response = self.client.post(self.config.endpoint()).json(payload).send()?;
        let status = response.status();
        check_status(status)?;
        Ok(status)
    }
}

/// Any non-2xx status is a failed upload.
pub fn check_status(status: StatusCode) -> Result<(), UploadError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(UploadError::Status(status))
    }
}

impl SnapshotProcessor for ViewerUploader {
    fn job_noun(&self) -> &'static str {
        "upload"
    }

    fn process(
        &mut self,
        artifact: &CapturedArtifact,
        job: &CaptureJob,
        log: &EventLog,
    ) -> Result<(), ProcessError> {
        let image = std::fs::read(&artifact.path).map_err(UploadError::from)?;
        let payload = ViewerPayload::build(&image, job, &self.config.org_id, self.config.min_duration_secs)?;

        log.push(format!("Uploading snapshot ({}s)", payload.duration));
        let status = self.send(&payload)?;
        tracing::info!(status = %status, session = %job.session_id, bytes = image.len(), "snapshot uploaded");
        log.push("Upload succeeded");
        Ok(())
    }
}
