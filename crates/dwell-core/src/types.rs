use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned face bounds in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One face reported by the detection provider for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounds: Rect,
}

impl From<Rect> for Detection {
    fn from(bounds: Rect) -> Self {
        Self { bounds }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SimilarityError {
    #[error("vectors must be the same length for cosine similarity ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
}

/// Placeholder face embedding: a fixed-length vector compared by cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Returns 0 when either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        cosine_similarity(&self.values, &other.values)
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// A visitor profile persisted by the local-matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProfile {
    pub id: String,
    pub vector: Vec<f32>,
    pub created_at: String,
    pub last_seen_at: String,
    pub visits: u32,
}

/// Outcome of matching one candidate embedding against the profile collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub id: String,
    /// Similarity of the matched profile; `None` when a new profile was stored.
    pub similarity: Option<f32>,
    pub is_new: bool,
    pub total: usize,
}

/// Best candidate found in a profile gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub index: usize,
    pub similarity: f32,
}

/// Strategy for comparing a probe embedding against stored profiles.
pub trait Matcher {
    /// Return the best-scoring profile, if any profile is comparable with `probe`.
    fn best_match(&self, probe: &Embedding, gallery: &[StoredProfile]) -> Option<BestMatch>;
}

/// Cosine similarity matcher.
///
/// Profiles whose vector length differs from the probe are skipped. The
/// first profile wins on ties.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &[StoredProfile]) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;

        for (index, profile) in gallery.iter().enumerate() {
            let Ok(similarity) = cosine_similarity(&profile.vector, &probe.values) else {
                continue;
            };
            let is_better = match best {
                None => true,
                Some(prev) => similarity > prev.similarity,
            };
            if is_better {
                best = Some(BestMatch { index, similarity });
            }
        }

        best
    }
}
