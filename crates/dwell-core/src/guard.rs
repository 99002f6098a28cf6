//! Capture guard: at most one capture+process job in flight.
//!
//! Acquiring the guard yields a [`GuardPermit`]. The permit travels with the
//! job and releases the guard when dropped, so every exit path of the job
//! (success, capture failure, processing failure, cleanup failure, a
//! rejected submission) releases it exactly once. Attempts made while the
//! guard is held are rejected, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CaptureGuard {
    busy: Arc<AtomicBool>,
}

impl CaptureGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the guard. Returns `None` if a job is already running.
    pub fn try_acquire(&self) -> Option<GuardPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of guard ownership. Dropping it releases the guard.
#[must_use = "dropping the permit releases the capture guard immediately"]
pub struct GuardPermit {
    busy: Arc<AtomicBool>,
}

impl std::fmt::Debug for GuardPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardPermit").finish_non_exhaustive()
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        tracing::trace!("capture guard released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_while_held() {
        let guard = CaptureGuard::new();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_busy());
    }

    #[test]
    fn test_release_allows_next_job() {
        let guard = CaptureGuard::new();
        drop(guard.try_acquire().unwrap());
        let second = guard.try_acquire();
        assert!(second.is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let guard = CaptureGuard::new();
        let other = guard.clone();
        let _permit = guard.try_acquire().unwrap();
        assert!(other.is_busy());
        assert!(other.try_acquire().is_none());
    }

    #[test]
    fn test_permit_released_from_other_thread() {
        let guard = CaptureGuard::new();
        let permit = guard.try_acquire().unwrap();
        std::thread::spawn(move || drop(permit)).join().unwrap();
        assert!(!guard.is_busy());
    }
}
