//! Dwell session tracker.
//!
//! A two-state presence machine (ABSENT ↔ PRESENT) fed one detection set per
//! frame. A session opens on the first frame of an unbroken run of non-empty
//! detections and closes on the first empty frame. Sessions that last at
//! least the dwell threshold qualify for capture; shorter ones are discarded.
//!
//! The tracker only decides. Logging and capture dispatch belong to
//! [`DwellPipeline`](crate::pipeline::DwellPipeline).

use crate::types::{Detection, Rect};
use uuid::Uuid;

pub const DEFAULT_SESSION_THRESHOLD_MS: i64 = 3000;

/// When a qualifying session triggers its capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Evaluate once, when the face leaves the frame.
    #[default]
    OnExit,
    /// Fire as soon as the threshold is crossed while the face is still
    /// present, at most once per session unless re-armed after a failure.
    OnThreshold,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub session_threshold_ms: i64,
    pub trigger: TriggerMode,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            session_threshold_ms: DEFAULT_SESSION_THRESHOLD_MS,
            trigger: TriggerMode::OnExit,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    id: Uuid,
    started_at_ms: i64,
    /// Where the threshold is measured from. Equals `started_at_ms` until a
    /// failed job re-arms the session.
    armed_at_ms: i64,
    last_bounds: Option<Rect>,
    triggered: bool,
}

impl Session {
    fn rearmed(&self) -> bool {
        self.armed_at_ms != self.started_at_ms
    }
}

/// A session that crossed the dwell threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedSession {
    pub session_id: Uuid,
    pub started_at_ms: i64,
    pub observed_at_ms: i64,
    pub elapsed_ms: i64,
    pub bounds: Option<Rect>,
}

/// What a single frame did to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// No face, no open session.
    Idle,
    /// A new session opened on this frame.
    Entered { faces: usize },
    /// Face still present; nothing to do.
    Present,
    /// Session closed below the threshold.
    Discarded { elapsed_ms: i64 },
    /// Session qualifies for capture.
    Qualified(QualifiedSession),
    /// Session closed after it already triggered.
    Closed { elapsed_ms: i64 },
}

#[derive(Debug, Default)]
pub struct DwellTracker {
    config: TrackerConfig,
    session: Option<Session>,
    face_present: bool,
    last_duration_ms: Option<i64>,
}

impl DwellTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            session: None,
            face_present: false,
            last_duration_ms: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Feed one frame's detections observed at `now_ms` (epoch millis).
    pub fn on_detection(&mut self, detections: &[Detection], now_ms: i64) -> FrameOutcome {
        if let Some(first) = detections.first() {
            self.face_present = true;
            return self.on_present(first.bounds, detections.len(), now_ms);
        }

        self.face_present = false;
        let Some(session) = self.session.take() else {
            return FrameOutcome::Idle;
        };

        let elapsed_ms = now_ms - session.started_at_ms;
        self.last_duration_ms = Some(elapsed_ms);

        if session.triggered {
            FrameOutcome::Closed { elapsed_ms }
        } else if now_ms - session.armed_at_ms >= self.config.session_threshold_ms {
            FrameOutcome::Qualified(QualifiedSession {
                session_id: session.id,
                started_at_ms: session.started_at_ms,
                observed_at_ms: now_ms,
                elapsed_ms,
                bounds: session.last_bounds,
            })
        } else if session.rearmed() {
            // Already qualified once; the retry window just ran out.
            FrameOutcome::Closed { elapsed_ms }
        } else {
            FrameOutcome::Discarded { elapsed_ms }
        }
    }

    fn on_present(&mut self, bounds: Rect, faces: usize, now_ms: i64) -> FrameOutcome {
        let threshold = self.config.session_threshold_ms;
        let trigger = self.config.trigger;

        match self.session.as_mut() {
            None => {
                self.session = Some(Session {
                    id: Uuid::new_v4(),
                    started_at_ms: now_ms,
                    armed_at_ms: now_ms,
                    last_bounds: Some(bounds),
                    triggered: false,
                });
                self.last_duration_ms = None;
                FrameOutcome::Entered { faces }
            }
            Some(session) => {
                session.last_bounds = Some(bounds);
                if trigger == TriggerMode::OnThreshold
                    && !session.triggered
                    && now_ms - session.armed_at_ms >= threshold
                {
                    session.triggered = true;
                    let elapsed_ms = now_ms - session.started_at_ms;
                    FrameOutcome::Qualified(QualifiedSession {
                        session_id: session.id,
                        started_at_ms: session.started_at_ms,
                        observed_at_ms: now_ms,
                        elapsed_ms,
                        bounds: session.last_bounds,
                    })
                } else {
                    FrameOutcome::Present
                }
            }
        }
    }

    /// Allow the open session to trigger again after a failed job.
    ///
    /// The threshold is measured again from `now_ms` before the next attempt.
    /// The session keeps its real start. Returns false if the session it
    /// belonged to has already closed.
    pub fn rearm(&mut self, session_id: Uuid, now_ms: i64) -> bool {
        match self.session.as_mut() {
            Some(session) if session.id == session_id => {
                session.triggered = false;
                session.armed_at_ms = now_ms;
                true
            }
            _ => false,
        }
    }

    /// Close any open session without evaluating it.
    pub fn reset(&mut self) {
        self.session = None;
        self.face_present = false;
    }

    pub fn is_face_present(&self) -> bool {
        self.face_present
    }

    pub fn session_started_at(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.started_at_ms)
    }

    pub fn last_bounds(&self) -> Option<Rect> {
        self.session.as_ref().and_then(|s| s.last_bounds)
    }

    /// Duration of the most recently closed session, cleared when a new one opens.
    pub fn last_duration_ms(&self) -> Option<i64> {
        self.last_duration_ms
    }
}
