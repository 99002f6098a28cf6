//! Frame-loop side of the capture pipeline.
//!
//! [`DwellPipeline`] owns one tracker and one capture guard for the lifetime
//! of a camera session. It is driven one frame at a time from a single task,
//! never blocks, and never returns an error: capture and processing happen
//! on the job lane behind a [`CaptureDispatcher`].

use crate::guard::{CaptureGuard, GuardPermit};
use crate::job::{CaptureJob, ReportReceiver};
use crate::log::{EventLog, LogEntry};
use crate::tracker::{DwellTracker, FrameOutcome, QualifiedSession, TrackerConfig};
use crate::types::{Detection, Rect};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("job lane unavailable")]
    Unavailable,
    #[error("job lane full")]
    Busy,
}

/// Hands a capture job to the job lane. The permit travels with the job;
/// if dispatch fails the permit is dropped and the guard released.
pub trait CaptureDispatcher {
    fn dispatch(&mut self, job: CaptureJob, permit: GuardPermit) -> Result<(), DispatchError>;
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub face_present: bool,
    pub status_message: &'static str,
    pub last_duration: Option<String>,
    pub session_started_at_ms: Option<i64>,
    pub last_bounds: Option<Rect>,
    pub capture_in_flight: bool,
    pub logs: Vec<LogEntry>,
}

pub struct DwellPipeline<D: CaptureDispatcher> {
    tracker: DwellTracker,
    guard: CaptureGuard,
    dispatcher: D,
    log: EventLog,
    reports: Option<ReportReceiver>,
    job_noun: &'static str,
}

impl<D: CaptureDispatcher> DwellPipeline<D> {
    pub fn new(config: TrackerConfig, dispatcher: D, log: EventLog) -> Self {
        Self {
            tracker: DwellTracker::new(config),
            guard: CaptureGuard::new(),
            dispatcher,
            log,
            reports: None,
            job_noun: "embedding",
        }
    }

    /// Job reports used to re-arm sessions whose job failed.
    pub fn with_reports(mut self, reports: ReportReceiver) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Noun for the "already running" log line ("embedding", "upload").
    pub fn with_job_noun(mut self, noun: &'static str) -> Self {
        self.job_noun = noun;
        self
    }

    pub fn guard(&self) -> &CaptureGuard {
        &self.guard
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn tracker(&self) -> &DwellTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Process one frame's detections.
    pub fn on_detection(&mut self, detections: &[Detection], now_ms: i64) -> FrameOutcome {
        self.drain_reports(now_ms);

        let outcome = self.tracker.on_detection(detections, now_ms);
        let threshold_ms = self.tracker.config().session_threshold_ms;

        match &outcome {
            FrameOutcome::Entered { faces } => {
                self.log.push(format!("Face entered ({faces})"));
            }
            FrameOutcome::Discarded { elapsed_ms } => {
                self.log.push(format!(
                    "Discarded short session ({} < {}s)",
                    format_secs(*elapsed_ms),
                    threshold_ms as f64 / 1000.0
                ));
            }
            FrameOutcome::Qualified(session) => {
                self.log.push(format!(
                    "Face kept for {}, capturing frame",
                    format_secs(session.elapsed_ms)
                ));
                self.try_capture(session.clone());
            }
            FrameOutcome::Closed { elapsed_ms } => {
                self.log.push(format!("Face left after {}", format_secs(*elapsed_ms)));
            }
            FrameOutcome::Idle | FrameOutcome::Present => {}
        }

        outcome
    }

    /// Start a capture job unless one is already in flight. Returns whether
    /// a job was handed to the lane.
    pub fn try_capture(&mut self, session: QualifiedSession) -> bool {
        let Some(permit) = self.guard.try_acquire() else {
            self.log.push(format!(
                "{} already running, skipping capture",
                capitalize(self.job_noun)
            ));
            return false;
        };

        let job = CaptureJob::from(session);
        let session_id = job.session_id;
        match self.dispatcher.dispatch(job, permit) {
            Ok(()) => {
                tracing::debug!(session = %session_id, "capture job dispatched");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, session = %session_id, "capture dispatch failed");
                self.log.push(match e {
                    DispatchError::Unavailable => "Capture skipped: camera not ready",
                    DispatchError::Busy => "Capture skipped: job queue full",
                });
                false
            }
        }
    }

    /// Manually close any open session.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.log.push("Session reset");
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let face_present = self.tracker.is_face_present();
        PipelineSnapshot {
            face_present,
            status_message: if face_present { "Face detected!" } else { "Searching…" },
            last_duration: self.tracker.last_duration_ms().map(format_secs),
            session_started_at_ms: self.tracker.session_started_at(),
            last_bounds: self.tracker.last_bounds(),
            capture_in_flight: self.guard.is_busy(),
            logs: self.log.entries(),
        }
    }

    fn drain_reports(&mut self, now_ms: i64) {
        let Some(reports) = self.reports.as_mut() else {
            return;
        };
        while let Ok(report) = reports.try_recv() {
            if report.outcome.is_failure() && self.tracker.rearm(report.session_id, now_ms) {
                self.log.push(format!(
                    "{} failed, retrying once the threshold is crossed again",
                    capitalize(self.job_noun)
                ));
            }
        }
    }
}

/// `3200` → `"3.2s"`.
pub fn format_secs(ms: i64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

pub(crate) fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{report_channel, JobOutcome, JobReport};
    use crate::tracker::TriggerMode;

    /// Keeps permits alive to simulate jobs still running on the lane.
    #[derive(Default)]
    struct HoldingDispatcher {
        held: Vec<(CaptureJob, GuardPermit)>,
        reject: Option<DispatchError>,
    }

    impl CaptureDispatcher for HoldingDispatcher {
        fn dispatch(&mut self, job: CaptureJob, permit: GuardPermit) -> Result<(), DispatchError> {
            if let Some(reject) = self.reject {
                return Err(reject);
            }
            self.held.push((job, permit));
            Ok(())
        }
    }

    fn face() -> Detection {
        Detection::from(Rect { x: 10.0, y: 20.0, width: 30.0, height: 40.0 })
    }

    fn pipeline() -> DwellPipeline<HoldingDispatcher> {
        DwellPipeline::new(TrackerConfig::default(), HoldingDispatcher::default(), EventLog::with_capacity(20))
    }

    fn session(p: &mut DwellPipeline<HoldingDispatcher>, start: i64, end: i64) -> FrameOutcome {
        p.on_detection(&[face()], start);
        p.on_detection(&[], end)
    }

    #[test]
    fn test_short_session_never_touches_guard() {
        let mut p = pipeline();
        let outcome = session(&mut p, 0, 2999);
        assert_eq!(outcome, FrameOutcome::Discarded { elapsed_ms: 2999 });
        assert!(!p.guard().is_busy());
        assert!(p.dispatcher().held.is_empty());
        assert_eq!(p.log().latest().unwrap(), "Discarded short session (3.0s < 3s)");
    }

    #[test]
    fn test_threshold_session_dispatches_with_bounds() {
        let mut p = pipeline();
        session(&mut p, 0, 3000);
        assert!(p.guard().is_busy());
        let (job, _) = &p.dispatcher().held[0];
        assert_eq!(job.elapsed_ms, 3000);
        assert_eq!(job.bounds, Some(face().bounds));
        assert_eq!(p.log().latest().unwrap(), "Face kept for 3.0s, capturing frame");
    }

    #[test]
    fn test_guard_set_skips_new_capture() {
        let mut p = pipeline();
        session(&mut p, 0, 3000);
        session(&mut p, 10_000, 13_000);

        assert_eq!(p.dispatcher().held.len(), 1);
        assert!(p.guard().is_busy());
        assert_eq!(p.log().latest().unwrap(), "Embedding already running, skipping capture");
    }

    #[test]
    fn test_guard_released_allows_next_capture() {
        let mut p = pipeline();
        session(&mut p, 0, 3000);
        p.dispatcher.held.clear();
        session(&mut p, 10_000, 14_000);
        assert_eq!(p.dispatcher().held.len(), 1);
    }

    #[test]
    fn test_failed_dispatch_releases_guard() {
        let mut p = DwellPipeline::new(
            TrackerConfig::default(),
            HoldingDispatcher { held: Vec::new(), reject: Some(DispatchError::Unavailable) },
            EventLog::default(),
        );
        session(&mut p, 0, 5000);
        assert!(!p.guard().is_busy());
        assert_eq!(p.log().latest().unwrap(), "Capture skipped: camera not ready");
    }

    #[test]
    fn test_full_queue_logs_distinct_line() {
        let mut p = DwellPipeline::new(
            TrackerConfig::default(),
            HoldingDispatcher { held: Vec::new(), reject: Some(DispatchError::Busy) },
            EventLog::default(),
        );
        session(&mut p, 0, 5000);
        assert!(!p.guard().is_busy());
        assert_eq!(p.log().latest().unwrap(), "Capture skipped: job queue full");
    }

    #[test]
    fn test_failure_report_rearms_open_session() {
        let (tx, rx) = report_channel();
        let config = TrackerConfig {
            session_threshold_ms: 3000,
            trigger: TriggerMode::OnThreshold,
        };
        let mut p = DwellPipeline::new(config, HoldingDispatcher::default(), EventLog::with_capacity(20))
            .with_reports(rx)
            .with_job_noun("upload");

        p.on_detection(&[face()], 0);
        assert!(matches!(p.on_detection(&[face()], 3000), FrameOutcome::Qualified(_)));
        let (job, permit) = p.dispatcher.held.remove(0);
        drop(permit);
        tx.send(JobReport { session_id: job.session_id, outcome: JobOutcome::ProcessFailed })
            .unwrap();

        // Report drained at 3500: the threshold is measured from there.
        assert_eq!(p.on_detection(&[face()], 3500), FrameOutcome::Present);
        assert_eq!(p.on_detection(&[face()], 6499), FrameOutcome::Present);
        assert!(matches!(p.on_detection(&[face()], 6500), FrameOutcome::Qualified(_)));
        assert_eq!(p.dispatcher().held.len(), 1);

        let (retry, _) = &p.dispatcher().held[0];
        assert_eq!(retry.session_id, job.session_id);
        assert_eq!(retry.started_at_ms, 0);
        assert_eq!(retry.ended_at_ms, 6500);
        assert_eq!(retry.elapsed_ms, 6500);
    }

    #[test]
    fn test_success_report_keeps_session_triggered() {
        let (tx, rx) = report_channel();
        let config = TrackerConfig {
            session_threshold_ms: 3000,
            trigger: TriggerMode::OnThreshold,
        };
        let mut p = DwellPipeline::new(config, HoldingDispatcher::default(), EventLog::default())
            .with_reports(rx);

        p.on_detection(&[face()], 0);
        p.on_detection(&[face()], 3000);
        let (job, _permit) = p.dispatcher.held.remove(0);
        tx.send(JobReport { session_id: job.session_id, outcome: JobOutcome::Completed })
            .unwrap();
        assert_eq!(p.on_detection(&[face()], 20_000), FrameOutcome::Present);
    }

    #[test]
    fn test_snapshot_reflects_presence() {
        let mut p = pipeline();
        p.on_detection(&[face()], 0);
        let snap = p.snapshot();
        assert!(snap.face_present);
        assert_eq!(snap.status_message, "Face detected!");
        assert_eq!(snap.session_started_at_ms, Some(0));

        p.on_detection(&[], 1500);
        let snap = p.snapshot();
        assert!(!snap.face_present);
        assert_eq!(snap.status_message, "Searching…");
        assert_eq!(snap.last_duration.as_deref(), Some("1.5s"));
    }

    #[test]
    fn test_reset_closes_session() {
        let mut p = pipeline();
        p.on_detection(&[face()], 0);
        p.reset();
        assert_eq!(p.on_detection(&[], 9000), FrameOutcome::Idle);
        assert!(p.dispatcher().held.is_empty());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("upload"), "Upload");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(3200), "3.2s");
        assert_eq!(format_secs(0), "0.0s");
    }
}
