//! Sliding-window admission control for the write path.
//!
//! Process-wide and in-memory: the window resets on restart. This is a soft
//! back-pressure policy, not a security boundary, and the timestamp window is
//! allowed to be momentarily stale between a check and the matching record.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::IngestConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed.
    Allowed {
        /// Admissions already recorded in the current window.
        in_window: usize,
        /// Configured threshold.
        limit: usize,
    },
    /// Threshold reached; the request must not touch the document.
    Limited {
        /// Admissions recorded in the current window.
        in_window: usize,
        /// Configured threshold.
        limit: usize,
        /// Time until the oldest admission leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    /// `true` when the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Seam between the ingest pipeline and whatever limiter backs it.
///
/// `check` runs before validation; `record` runs only after the event has been
/// aggregated and persisted.
pub trait AdmissionControl: Send + Sync + fmt::Debug {
    /// Decide whether a new request may proceed right now.
    fn check(&self) -> Admission;
    /// Count a completed admission against the window.
    fn record(&self);
}

/// Sliding window of admission timestamps.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    max_events: usize,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Limiter admitting at most `max_events` per rolling `window`.
    #[must_use]
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self {
            window,
            max_events,
            admitted: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
        }
    }

    /// Limiter sized from the ingest configuration.
    #[must_use]
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.rate_limit_window(), config.rate_limit_max_events)
    }

    /// Check admission as of `now`, discarding timestamps that fell out of the window.
    pub fn check_at(&self, now: Instant) -> Admission {
        let mut admitted = self.admitted.lock();
        self.evict_expired(&mut admitted, now);

        let in_window = admitted.len();
        if in_window >= self.max_events {
            let retry_after = admitted.front().map_or(Duration::ZERO, |oldest| {
                self.window
                    .saturating_sub(now.saturating_duration_since(*oldest))
            });
            return Admission::Limited {
                in_window,
                limit: self.max_events,
                retry_after,
            };
        }

        Admission::Allowed {
            in_window,
            limit: self.max_events,
        }
    }

    /// Record an admission that completed at `now`.
    pub fn record_at(&self, now: Instant) {
        self.admitted.lock().push_back(now);
    }

    /// Admissions still inside the window as of `now`.
    pub fn in_window_at(&self, now: Instant) -> usize {
        let mut admitted = self.admitted.lock();
        self.evict_expired(&mut admitted, now);
        admitted.len()
    }

    fn evict_expired(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl AdmissionControl for SlidingWindowLimiter {
    fn check(&self) -> Admission {
        self.check_at(Instant::now())
    }

    fn record(&self) {
        self.record_at(Instant::now());
    }
}

/// Admits everything; used when rate limiting is disabled in config.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl AdmissionControl for Unlimited {
    fn check(&self) -> Admission {
        Admission::Allowed {
            in_window: 0,
            limit: usize::MAX,
        }
    }

    fn record(&self) {}
}
