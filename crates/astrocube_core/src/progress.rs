//! Cooperative progress reporting and cancellation.
//!
//! A [`ProgressToken`] is a shared integer status cell:
//! `-1` cancel requested, `0` idle, `1..=99` running, `100` done.
//! The host polls it for a progress bar and writes `-1` to stop a kernel.
//! Kernels never overwrite a pending `-1` with a progress value.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use log::warn;

use crate::error::{CubeError, CubeResult};

pub const STATUS_CANCEL_REQUESTED: i32 = -1;
pub const STATUS_IDLE: i32 = 0;
pub const STATUS_DONE: i32 = 100;

/// Shared status cell polled by every parallel loop.
///
/// Cloning shares the same cell, so the host keeps one clone and hands
/// another to the worker.
#[derive(Debug, Clone, Default)]
pub struct ProgressToken {
    status: Arc<AtomicI32>,
}

impl ProgressToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn status(&self) -> i32 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.status.store(STATUS_CANCEL_REQUESTED, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.status() == STATUS_CANCEL_REQUESTED
    }

    /// Move to the running state. Fails if a cancel is already pending.
    pub fn begin(&self) -> CubeResult<()> {
        self.status
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
                (s != STATUS_CANCEL_REQUESTED).then_some(1)
            })
            .map(|_| ())
            .map_err(|_| CubeError::Canceled)
    }

    /// Publish a progress percentage, clamped to `1..=99`.
    ///
    /// Lost updates are fine; a pending cancel always wins.
    pub fn report(&self, percent: i32) {
        let value = percent.clamp(1, 99);
        let _ = self
            .status
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
                (s != STATUS_CANCEL_REQUESTED).then_some(value)
            });
    }

    /// Terminal state for both success and failure.
    pub fn finish(&self) {
        self.status.store(STATUS_DONE, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.status.store(STATUS_IDLE, Ordering::Relaxed);
    }
}

/// Per-call cancellation latch shared by the workers of one kernel.
///
/// The first worker to see `-1` on the token flips the latch; everyone else
/// then only reads the local flag and skips its remaining voxels.
#[derive(Debug)]
pub struct CancelGate<'a> {
    token: &'a ProgressToken,
    latched: AtomicBool,
}

impl<'a> CancelGate<'a> {
    pub fn new(token: &'a ProgressToken) -> Self {
        Self {
            token,
            latched: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &'a ProgressToken {
        self.token
    }

    /// Check the token and latch if cancellation was requested.
    #[inline]
    pub fn poll(&self) -> bool {
        if self.latched.load(Ordering::Relaxed) {
            return true;
        }
        if self.token.is_cancel_requested() {
            if !self.latched.swap(true, Ordering::Relaxed) {
                warn!("cancellation requested, abandoning remaining work");
            }
            return true;
        }
        false
    }

    #[inline]
    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Relaxed)
    }

    /// `Err(Canceled)` once the latch is set, polling the token first.
    pub fn check(&self) -> CubeResult<()> {
        if self.poll() {
            Err(CubeError::Canceled)
        } else {
            Ok(())
        }
    }

    /// `Err(Canceled)` if any worker latched during the last parallel region.
    pub fn finish_region(&self) -> CubeResult<()> {
        if self.is_latched() {
            Err(CubeError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Maps completed work units onto the status band `start..end`.
#[derive(Debug)]
pub struct ProgressBand<'a> {
    token: &'a ProgressToken,
    start: i32,
    span: i32,
    total: usize,
    done: AtomicUsize,
}

impl<'a> ProgressBand<'a> {
    pub fn new(token: &'a ProgressToken, start: i32, end: i32, total: usize) -> Self {
        Self {
            token,
            start,
            span: (end - start).max(0),
            total: total.max(1),
            done: AtomicUsize::new(0),
        }
    }

    /// Record one finished unit.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let offset = self.offset(done);
        if done == 1 || offset != self.offset(done - 1) {
            self.token.report(self.start + offset as i32);
        }
    }

    #[inline]
    fn offset(&self, done: usize) -> usize {
        (self.span as usize * done.min(self.total)) / self.total
    }
}

/// Request cancellation from a second thread once `token` reports at least
/// `status`, so a kernel is stopped while it is running.
#[cfg(test)]
pub(crate) fn cancel_when_status_reaches(
    token: &ProgressToken,
    status: i32,
) -> std::thread::JoinHandle<()> {
    use std::time::{Duration, Instant};

    let token = token.clone();
    std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(30);
        while token.status() < status && Instant::now() < deadline {
            std::thread::yield_now();
        }
        token.request_cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lifecycle() {
        let token = ProgressToken::new();
        assert_eq!(token.status(), STATUS_IDLE);
        token.begin().unwrap();
        assert_eq!(token.status(), 1);
        token.report(42);
        assert_eq!(token.status(), 42);
        token.report(150);
        assert_eq!(token.status(), 99);
        token.finish();
        assert_eq!(token.status(), STATUS_DONE);
        token.reset();
        assert_eq!(token.status(), STATUS_IDLE);
    }

    #[test]
    fn test_report_never_overwrites_cancel() {
        let token = ProgressToken::new();
        token.request_cancel();
        token.report(50);
        assert!(token.is_cancel_requested());
        assert_eq!(token.begin(), Err(CubeError::Canceled));
    }

    #[test]
    fn test_clones_share_status() {
        let host = ProgressToken::new();
        let worker = host.clone();
        worker.report(10);
        assert_eq!(host.status(), 10);
        host.request_cancel();
        assert!(worker.is_cancel_requested());
    }

    #[test]
    fn test_gate_latches() {
        let token = ProgressToken::new();
        let gate = CancelGate::new(&token);
        assert!(!gate.poll());
        assert!(gate.check().is_ok());
        token.request_cancel();
        assert!(gate.poll());
        assert!(gate.is_latched());
        // Latch survives a status reset by the host.
        token.reset();
        assert!(gate.poll());
        assert_eq!(gate.finish_region(), Err(CubeError::Canceled));
    }

    #[test]
    fn test_band_progress() {
        let token = ProgressToken::new();
        let band = ProgressBand::new(&token, 0, 50, 4);
        band.tick();
        assert_eq!(token.status(), 12);
        band.tick();
        band.tick();
        band.tick();
        assert_eq!(token.status(), 50);
        band.tick();
        assert_eq!(token.status(), 50);
    }

    #[test]
    fn test_cancel_helper_waits_for_progress() {
        let token = ProgressToken::new();
        let handle = cancel_when_status_reaches(&token, 30);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(token.status(), STATUS_IDLE);
        token.report(30);
        handle.join().unwrap();
        assert!(token.is_cancel_requested());
    }
}
