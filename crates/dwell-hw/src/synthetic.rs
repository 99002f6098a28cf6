//! Camera-less capture provider.
//!
//! Writes a uniform gray PNG per capture. Used for replays and for running
//! the daemon on machines without a V4L2 device.

use crate::frame::{self, Frame};
use dwell_core::job::{CaptureError, CaptureProvider, CapturedArtifact};
use std::path::PathBuf;

const SYNTHETIC_WIDTH: u32 = 64;
const SYNTHETIC_HEIGHT: u32 = 48;
const SYNTHETIC_LEVEL: u8 = 128;

pub struct SyntheticCapture {
    capture_dir: PathBuf,
}

impl SyntheticCapture {
    pub fn new(capture_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let capture_dir = capture_dir.into();
        std::fs::create_dir_all(&capture_dir)?;
        tracing::info!(capture_dir = %capture_dir.display(), "synthetic capture ready");
        Ok(Self { capture_dir })
    }
}

impl CaptureProvider for SyntheticCapture {
    fn capture(&mut self) -> Result<Option<CapturedArtifact>, CaptureError> {
        let path = frame::next_artifact_path(&self.capture_dir);
        Frame::filled(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, SYNTHETIC_LEVEL)
            .save_png(&path)
            .map_err(|e| CaptureError::Device(Box::new(e)))?;
        Ok(Some(CapturedArtifact { path }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = SyntheticCapture::new(dir.path().join("captures")).unwrap();
        let artifact = capture.capture().unwrap().unwrap();
        assert!(artifact.path.exists());
        assert!(artifact.path.starts_with(dir.path().join("captures")));
    }

    #[test]
    fn test_each_capture_gets_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = SyntheticCapture::new(dir.path()).unwrap();
        let a = capture.capture().unwrap().unwrap();
        let b = capture.capture().unwrap().unwrap();
        assert_ne!(a.path, b.path);
    }
}
