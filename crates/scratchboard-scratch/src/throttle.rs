//! Rate limiting for the reveal scan.
//!
//! [`RasterMask::reveal_fraction`](crate::RasterMask::reveal_fraction) walks
//! the whole buffer, so it runs at most once per `every_n` erase calls or
//! once per frame interval, whichever comes first. Erases that happened since
//! the last scan are tracked so a stroke end can force a final scan.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ScanThrottle {
    every_n: u32,
    min_interval: Duration,
    pending: u32,
    last_scan: Option<Instant>,
}

impl ScanThrottle {
    /// `every_n` of 0 is treated as 1. A zero `min_interval` disables the
    /// time-based trigger.
    pub fn new(every_n: u32, min_interval: Duration) -> Self {
        Self {
            every_n: every_n.max(1),
            min_interval,
            pending: 0,
            last_scan: None,
        }
    }

    /// Scan after every `n` erases, ignoring time.
    pub fn every(n: u32) -> Self {
        Self::new(n, Duration::ZERO)
    }

    /// Record one erase. Returns `true` if a scan is due now.
    pub fn record_erase(&mut self) -> bool {
        self.record_erase_at(Instant::now())
    }

    pub fn record_erase_at(&mut self, now: Instant) -> bool {
        self.pending = self.pending.saturating_add(1);

        if self.pending >= self.every_n {
            return true;
        }
        if self.min_interval.is_zero() {
            return false;
        }
        match self.last_scan {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        }
    }

    pub fn mark_scanned(&mut self) {
        self.mark_scanned_at(Instant::now());
    }

    pub fn mark_scanned_at(&mut self, now: Instant) {
        self.pending = 0;
        self.last_scan = Some(now);
    }

    /// Whether erases happened since the last scan.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }
}

impl Default for ScanThrottle {
    fn default() -> Self {
        Self::new(8, Duration::from_millis(16))
    }
}
