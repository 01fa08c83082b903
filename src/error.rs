//! Error surface for the channel core.
//!
//! Most of the outcomes spec.md's error table lists are not exceptions at all — a put against a
//! closed channel resolves `false`, a drained-and-closed get resolves `None` — so this module only
//! covers the two conditions that are genuinely programmer errors: queue overflow and (for the
//! Publisher) a user topic function that panics or is otherwise misused.

use thiserror::Error;

/// Raised when a channel's parked-operation queue would exceed its configured limit.
///
/// This mirrors the source's bare `assert len(self._puts) < MAX_OP_QUEUE_SIZE`: an unbounded
/// producer/consumer asymmetry is a programming bug, not a recoverable condition, so callers are
/// expected to let this propagate rather than match on it.
#[derive(Debug, Error)]
pub enum ChanError {
    /// More than `limit` puts are parked on a single channel with no matching getter.
    #[error("pending put queue exceeded {limit} entries; channel has no matching consumer")]
    PutQueueOverflow { limit: usize },
    /// More than `limit` gets are parked on a single channel with no matching putter.
    #[error("pending get queue exceeded {limit} entries; channel has no matching producer")]
    GetQueueOverflow { limit: usize },
}
