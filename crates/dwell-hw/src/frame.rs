//! Frame type, YUYV conversion, PNG artifact writing.

use image::{GrayImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Uniform frame of a single gray level.
    pub fn filled(width: u32, height: u32, level: u8) -> Self {
        Self {
            data: vec![level; (width * height) as usize],
            width,
            height,
            sequence: 0,
        }
    }

    /// Encode as PNG at `path`.
    pub fn save_png(&self, path: &Path) -> Result<(), FrameError> {
        let expected = (self.width * self.height) as usize;
        let image = GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )?;
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

static ARTIFACT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique path for the next capture artifact inside `dir`.
pub fn next_artifact_path(dir: &Path) -> PathBuf {
    let n = ARTIFACT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
    dir.join(format!("capture-{stamp}-{n}.png"))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("encode: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = yuyv_to_grayscale(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_save_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        Frame::filled(8, 4, 77).save_png(&path).unwrap();

        let decoded = image::open(&path).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert!(decoded.pixels().all(|p| p.0[0] == 77));
    }

    #[test]
    fn test_save_png_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame {
            data: vec![0; 3],
            width: 2,
            height: 2,
            sequence: 0,
        };
        let err = frame.save_png(&dir.path().join("bad.png")).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_artifact_paths_unique() {
        let dir = Path::new("/tmp/dwell");
        let a = next_artifact_path(dir);
        let b = next_artifact_path(dir);
        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("png"));
    }
}
