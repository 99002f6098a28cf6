//! dwell-core — Face-dwell session tracking and capture pipeline.
//!
//! Tracks how long a face stays in frame, starts at most one capture job per
//! qualifying session, and either matches the snapshot against a locally
//! persisted profile collection or uploads it to the viewer endpoint.

pub mod embedding;
pub mod feed;
pub mod guard;
pub mod job;
pub mod log;
pub mod pipeline;
pub mod process;
pub mod store;
pub mod tracker;
pub mod types;
pub mod upload;

pub use feed::DetectionFrame;
pub use guard::{CaptureGuard, GuardPermit};
pub use job::{CaptureJob, CaptureProvider, CapturedArtifact, JobRunner};
pub use log::EventLog;
pub use pipeline::{CaptureDispatcher, DwellPipeline, PipelineSnapshot};
pub use process::{LocalMatchProcessor, SnapshotProcessor};
pub use tracker::{DwellTracker, FrameOutcome, TrackerConfig, TriggerMode};
pub use types::{CosineMatcher, Detection, Embedding, Matcher, Rect, StoredProfile};
