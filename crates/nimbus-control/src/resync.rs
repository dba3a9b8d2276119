//! # Frame-Loss Aggregation
//!
//! Loss events can arrive from the AV pipeline faster than one resync
//! round-trip to the host. Ranges are queued on an unbounded MPSC channel and
//! a single worker drains every queued range per wakeup, collapsing the burst
//! into one outbound request. FIFO order is all the queue guarantees, and all
//! the merge needs.

use crossbeam_channel::Receiver;

// ─── Frame Range ─────────────────────────────────────────────────────────────

/// A span of frames the receiver failed to decode or display, as reported by
/// the AV pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    /// First frame that was lost.
    pub first_lost_frame: i32,
    /// Next frame the receiver handled successfully.
    pub next_successful_frame: i32,
}

impl FrameRange {
    pub fn new(first_lost_frame: i32, next_successful_frame: i32) -> Self {
        FrameRange {
            first_lost_frame,
            next_successful_frame,
        }
    }
}

// ─── Coalescing ──────────────────────────────────────────────────────────────

/// Merge a burst of queued ranges into one recovery request.
///
/// The host expects the request to name the frame AFTER the last known-good
/// one, so the first range's start is bumped by one. The end of the request
/// comes from the last range drained, or from the first range when the burst
/// was a single report.
pub(crate) fn coalesce<I>(first: FrameRange, rest: I) -> FrameRange
where
    I: IntoIterator<Item = FrameRange>,
{
    let mut merged = FrameRange {
        first_lost_frame: first.first_lost_frame + 1,
        next_successful_frame: first.next_successful_frame,
    };
    if let Some(last) = rest.into_iter().last() {
        merged.next_successful_frame = last.next_successful_frame;
    }
    merged
}

/// Drain every currently-queued range without blocking and merge the batch.
pub(crate) fn drain_batch(first: FrameRange, queued: &Receiver<FrameRange>) -> FrameRange {
    coalesce(first, queued.try_iter())
}
