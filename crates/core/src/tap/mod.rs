use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::Tempo;

/// Most recent taps kept for the estimate.
pub const TAP_CAPACITY: usize = 5;
/// Silence after which the next tap starts a new session.
pub const TAP_SESSION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Converts a short burst of taps into a tempo.
#[derive(Debug, Default, Clone)]
pub struct TapTempo {
    taps: VecDeque<Instant>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tap and returns the tempo implied by the retained taps, or
    /// `None` while fewer than two taps belong to the current session.
    pub fn record_tap(&mut self, now: Instant) -> Option<Tempo> {
        let stale = self
            .taps
            .back()
            .map(|last| now.saturating_duration_since(*last) > TAP_SESSION_TIMEOUT)
            .unwrap_or(false);
        if stale {
            tracing::debug!(discarded = self.taps.len(), "tap session timed out");
            self.taps.clear();
        }

        self.taps.push_back(now);
        while self.taps.len() > TAP_CAPACITY {
            self.taps.pop_front();
        }

        self.estimate()
    }

    /// Tempo from the arithmetic mean of the consecutive tap intervals.
    pub fn estimate(&self) -> Option<Tempo> {
        if self.taps.len() < 2 {
            return None;
        }

        let first = self.taps.front()?;
        let last = self.taps.back()?;
        // The mean of consecutive deltas telescopes to span / count.
        let span_ms = last.saturating_duration_since(*first).as_secs_f64() * 1000.0;
        let mean_ms = span_ms / (self.taps.len() - 1) as f64;
        if mean_ms <= 0.0 {
            return Some(Tempo::clamped(i64::from(Tempo::MAX)));
        }

        Some(Tempo::clamped((60_000.0 / mean_ms).round() as i64))
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}
