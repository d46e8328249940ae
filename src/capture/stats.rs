use std::sync::atomic::{AtomicU64, Ordering};

use super::parse::ParseOutcome;

/// Lock-free counters written by the capture pump and read by the
/// orchestrator.
#[derive(Debug, Default)]
pub struct CaptureStats {
    captured: AtomicU64,
    partial: AtomicU64,
    read_errors: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSnapshot {
    /// Frames read and pushed into the exchange buffer.
    pub captured: u64,
    /// Frames whose headers were truncated or malformed.
    pub partial: u64,
    /// Transient read failures.
    pub read_errors: u64,
    /// Frames dropped below us by the kernel or driver.
    pub dropped: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self, outcome: ParseOutcome) {
        self.captured.fetch_add(1, Ordering::Relaxed);
        if outcome == ParseOutcome::Partial {
            self.partial.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores the capture layer's cumulative drop count.
    pub fn set_dropped(&self, dropped: u64) {
        self.dropped.store(dropped, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
