#![deny(warnings)]

//! Blocking coordination primitives for the skynet simulation.
//!
//! This crate provides the three pieces every party of a run shares:
//! - [`CancelToken`]: cooperative cancellation flag
//! - [`SharedStorage`]: bounded FIFO with blocking `put` and non-blocking drain
//! - [`PhaseBarrier`]: cyclic rendezvous with a sticky broken state
//!
//! Every blocking wait re-checks its token at least every [`CANCEL_POLL`], so
//! a cancelled party wakes within that grace period.

use std::time::Duration;
use thiserror::Error;

mod barrier;
mod cancel;
mod storage;

pub use barrier::{Crossing, PhaseBarrier};
pub use cancel::CancelToken;
pub use storage::SharedStorage;

/// Longest a blocked wait sleeps before re-checking cancellation.
pub const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Errors produced by the coordination primitives.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The calling party's token was cancelled while it waited.
    #[error("operation cancelled")]
    Cancelled,
    /// Another party cancelled or failed; the barrier no longer trips.
    #[error("barrier is broken")]
    BrokenBarrier,
    #[error("storage capacity must be > 0")]
    ZeroCapacity,
    #[error("barrier needs at least one party")]
    ZeroParties,
}
