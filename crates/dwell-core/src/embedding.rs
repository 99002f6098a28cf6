//! Deterministic placeholder embedding.
//!
//! Derives a fixed-length vector from a textual descriptor of a capture
//! (artifact path suffix, face bounds, rounded dwell duration). The vector
//! is a pure function of the descriptor: identical descriptors always yield
//! identical vectors. It carries no perceptual information.

use crate::types::{Embedding, Rect};
use serde::Serialize;

pub const EMBEDDING_DIM: usize = 128;

/// Only the tail of the artifact path feeds the descriptor.
const PATH_SUFFIX_CHARS: usize = 60;

const HASH_MULTIPLIER: u64 = 31;
const HASH_MODULUS: u64 = 2_147_483_647;
const LCG_MULTIPLIER: u64 = 1_664_525;
const LCG_INCREMENT: u64 = 1_013_904_223;
const LCG_MODULUS: u64 = 4_294_967_296;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureDescriptor<'a> {
    path: &'a str,
    bounds: Option<Rect>,
    duration_ms: i64,
}

/// Build the descriptor string for a captured artifact.
pub fn capture_descriptor(
    artifact_path: &str,
    bounds: Option<Rect>,
    elapsed_ms: i64,
) -> serde_json::Result<String> {
    let char_count = artifact_path.chars().count();
    let suffix = match artifact_path
        .char_indices()
        .nth(char_count.saturating_sub(PATH_SUFFIX_CHARS))
    {
        Some((start, _)) => &artifact_path[start..],
        None => artifact_path,
    };

    let descriptor = CaptureDescriptor {
        path: suffix,
        bounds,
        duration_ms: elapsed_ms,
    };
    serde_json::to_string(&descriptor)
}

/// Polynomial rolling hash over UTF-16 code units, reduced modulo 2^31 - 1.
fn descriptor_seed(source: &str) -> u64 {
    source.encode_utf16().fold(0u64, |hash, unit| {
        (hash * HASH_MULTIPLIER + u64::from(unit)) % HASH_MODULUS
    })
}

/// Generate the embedding for `source`.
pub fn deterministic_embedding(source: &str) -> Embedding {
    let mut state = descriptor_seed(source);
    let values = (0..EMBEDDING_DIM)
        .map(|_| {
            state = (state * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
            ((state as f64 / LCG_MODULUS as f64) * 2.0 - 1.0) as f32
        })
        .collect();

    Embedding::new(values)
}
