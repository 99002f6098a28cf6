//! Detection feed lines: one JSON object per frame.
//!
//! ```text
//! {"faces":[{"x":10,"y":20,"width":120,"height":140}],"t_ms":1762000000000}
//! {"faces":[]}
//! ```

use crate::types::{Detection, Rect};
use serde::Deserialize;

/// One frame's worth of detections. `t_ms` is optional; callers decide what
/// a missing timestamp means.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionFrame {
    #[serde(default)]
    pub faces: Vec<Rect>,
    #[serde(default)]
    pub t_ms: Option<i64>,
}

impl DetectionFrame {
    pub fn detections(&self) -> Vec<Detection> {
        self.faces.iter().copied().map(Detection::from).collect()
    }

    pub fn timestamp_or(&self, fallback_ms: i64) -> i64 {
        self.t_ms.unwrap_or(fallback_ms)
    }
}

/// Parse one feed line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<DetectionFrame>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}
