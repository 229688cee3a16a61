//! Timer-driven entry points, modelled as plain state machines.
//!
//! The host owns the clock and calls in with `Instant`s; nothing here sleeps
//! or spawns.

use std::time::{Duration, Instant};

/// Coalesces bursts of search input into one evaluation.
///
/// Each new input restarts the window; [`SearchDebouncer::poll`] yields the
/// latest term once the window has passed without further input.
#[derive(Debug)]
pub struct SearchDebouncer {
    window: Duration,
    pending: Option<(String, Instant)>,
}

impl SearchDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: None }
    }

    pub fn input(&mut self, term: &str, now: Instant) {
        self.pending = Some((term.to_string(), now));
    }

    pub fn poll(&mut self, now: Instant) -> Option<String> {
        let ready = match &self.pending {
            Some((_, at)) => now.saturating_duration_since(*at) >= self.window,
            None => false,
        };
        if ready {
            self.pending.take().map(|(term, _)| term)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Says when a timer-driven reconciliation attempt is due.
#[derive(Debug)]
pub struct PeriodicSync {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl PeriodicSync {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_attempt: None }
    }

    /// The first tick is always due.
    pub fn due(&self, now: Instant) -> bool {
        match self.last_attempt {
            Some(at) => now.saturating_duration_since(at) >= self.interval,
            None => true,
        }
    }

    pub fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}
