//! # Loss-Rate Tracking
//!
//! Converts the raw stream of loss and slow-sink events reported by the AV
//! pipeline into throttled user warnings. Warning suppression is independent
//! of recovery: every event still produces a resync request upstream; this
//! module only decides when the *user* hears about it.
//!
//! Throttling works by letting a counter go negative after a warning fires,
//! so a run of further events has to climb back through zero before the
//! condition can trip again.

use std::time::Duration;

use quanta::Instant;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Length of one loss-counting window.
pub const LOSS_WINDOW: Duration = Duration::from_millis(15_000);

/// Loss events within one window that trip a warning.
pub const MAX_LOSS_EVENTS_PER_WINDOW: i32 = 2;

/// Cumulative slow-sink events that trip a warning. No window; the counter
/// only resets through the cooldown.
pub const MAX_SLOW_SINK_EVENTS: i32 = 2;

/// After a warning fires, the counter is set to `-threshold * factor`, so the
/// same condition must accumulate that many extra events before it can trip
/// again.
pub const WARNING_COOLDOWN_FACTOR: i32 = 3;

// ─── Warnings ────────────────────────────────────────────────────────────────

/// A user-facing warning the tracker decided to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossWarning {
    /// Too many loss events inside one window.
    ExcessiveLoss,
    /// The local sink is consuming A/V data too slowly.
    SinkTooSlow,
}

impl LossWarning {
    /// Message text to hand to the notification sink.
    pub fn message(&self) -> &'static str {
        match self {
            LossWarning::ExcessiveLoss => {
                "Detected excessive A/V data loss. Try improving your network \
                 connection or lowering stream resolution and/or frame rate."
            }
            LossWarning::SinkTooSlow => {
                "Your device is processing the A/V data too slowly. Try lowering \
                 stream resolution and/or frame rate."
            }
        }
    }
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

/// Pure bookkeeping state machine for loss and slow-sink events. No I/O.
///
/// Callers that can invoke the recording operations from several threads must
/// wrap the tracker in a lock; the session does exactly that.
#[derive(Debug)]
pub struct LossTracker {
    /// Start of the current loss window. `None` is the unset sentinel, both
    /// initially and after a warning fires.
    window_start: Option<Instant>,
    loss_events: i32,
    slow_sink_events: i32,
}

impl LossTracker {
    pub fn new() -> Self {
        LossTracker {
            window_start: None,
            loss_events: 0,
            slow_sink_events: 0,
        }
    }

    /// Record one loss event observed at `now`.
    ///
    /// An event past the end of the current window (or with no window open)
    /// increments the count and opens a new window WITHOUT evaluating the
    /// threshold; only in-window events can trip. The count must land exactly
    /// on the threshold to trip, so a count that skipped past it while
    /// windows were expiring stays quiet.
    pub fn record_loss(&mut self, now: Instant) -> Option<LossWarning> {
        match self.window_start {
            Some(start) if now <= start + LOSS_WINDOW => {
                self.loss_events += 1;
                if self.loss_events == MAX_LOSS_EVENTS_PER_WINDOW {
                    self.loss_events = -MAX_LOSS_EVENTS_PER_WINDOW * WARNING_COOLDOWN_FACTOR;
                    self.window_start = None;
                    return Some(LossWarning::ExcessiveLoss);
                }
                None
            }
            _ => {
                self.loss_events += 1;
                self.window_start = Some(now);
                None
            }
        }
    }

    /// Record one slow-sink event. Cumulative, no window.
    pub fn record_slow_sink(&mut self) -> Option<LossWarning> {
        self.slow_sink_events += 1;
        if self.slow_sink_events == MAX_SLOW_SINK_EVENTS {
            self.slow_sink_events = -MAX_SLOW_SINK_EVENTS * WARNING_COOLDOWN_FACTOR;
            return Some(LossWarning::SinkTooSlow);
        }
        None
    }
}

impl Default for LossTracker {
    fn default() -> Self {
        Self::new()
    }
}
