//! Error-burst detection
//!
//! A sliding-window counter that separates isolated transient faults from
//! systemic ones: single errors pass through, but a burst inside the
//! window raises one inspection signal and rearms.

use std::time::{Duration, Instant};

/// Default number of errors inside the window that constitutes a burst
pub const DEFAULT_ERROR_COUNT: u32 = 3;
/// Default window length
pub const DEFAULT_ERROR_WINDOW: Duration = Duration::from_millis(1000);

/// Per-channel sliding-window error counter.
///
/// Not shared between channels; each channel owns its own window state.
#[derive(Debug)]
pub struct ErrorBurst {
    threshold: u32,
    window: Duration,
    count: u32,
    window_start: Option<Instant>,
}

impl Default for ErrorBurst {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_COUNT, DEFAULT_ERROR_WINDOW)
    }
}

impl ErrorBurst {
    /// Create a monitor that signals after `threshold` errors within `window`
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            count: 0,
            window_start: None,
        }
    }

    /// Record one error.
    ///
    /// Returns `true` exactly when this error completes a burst; the
    /// window is then reset to idle so the next error opens a fresh one.
    pub fn record(&mut self) -> bool {
        self.record_at(Instant::now())
    }

    fn record_at(&mut self, now: Instant) -> bool {
        let expired = match self.window_start {
            Some(start) => now.duration_since(start) > self.window,
            None => true,
        };

        if self.count == 0 || expired {
            self.window_start = Some(now);
            self.count = 1;
        } else {
            self.count += 1;
        }

        if self.count >= self.threshold {
            self.count = 0;
            self.window_start = None;
            true
        } else {
            false
        }
    }
}
