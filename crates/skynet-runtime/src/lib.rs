#![deny(warnings)]

//! Threaded runtime for the skynet robot race.
//!
//! One [`Factory`] thread and one [`Faction`] thread per competitor share a
//! [`Commons`]: the part storage plus a day and a night [`PhaseBarrier`].
//! Each simulated day is one full cycle of both barriers. The factory fills
//! storage before the day barrier, factions drain and assemble between the
//! day and night barriers, and the factory only starts the next batch after
//! the night barrier. [`Simulation`] wires everything up, enforces the
//! timeout and turns the per-thread results into a [`SimReport`].

use std::sync::Arc;
use std::time::Duration;

use skynet_core::{Part, ValidationError};
use skynet_sync::{CancelToken, PhaseBarrier, SharedStorage, SyncError};
use thiserror::Error;
use tracing::debug;

mod factory;
mod faction;
mod sim;

pub use factory::{Factory, ProductionLog};
pub use faction::{Faction, FactionOutcome};
pub use sim::{run_simulation, Party, SimReport, Simulation};

/// State shared by every party of one run.
#[derive(Clone)]
pub struct Commons {
    /// Parts produced but not yet collected.
    pub storage: Arc<SharedStorage<Part>>,
    /// Tripped once production for the day is complete.
    pub day: Arc<PhaseBarrier>,
    /// Tripped once every faction has finished collecting and assembling.
    pub night: Arc<PhaseBarrier>,
}

impl Commons {
    pub fn new(storage_capacity: usize, parties: usize) -> Result<Self, SyncError> {
        Ok(Self {
            storage: Arc::new(SharedStorage::new(storage_capacity)?),
            day: Arc::new(PhaseBarrier::new("day", parties)?),
            night: Arc::new(PhaseBarrier::new("night", parties)?),
        })
    }

    /// Break both barriers so no party stays parked.
    pub fn abort(&self) {
        self.day.abort();
        self.night.abort();
    }

    /// Wait until every party is ready to start `day`.
    pub fn dawn(&self, day: u32, token: &CancelToken) -> Result<(), SyncError> {
        cross(&self.day, day, token)
    }

    /// Wait until every party has finished `day`.
    pub fn dusk(&self, day: u32, token: &CancelToken) -> Result<(), SyncError> {
        cross(&self.night, day, token)
    }
}

fn cross(barrier: &PhaseBarrier, day: u32, token: &CancelToken) -> Result<(), SyncError> {
    let crossing = barrier.wait(token)?;
    if crossing.leader {
        debug!(
            barrier = barrier.label(),
            day,
            generation = crossing.generation,
            "phase complete"
        );
    }
    Ok(())
}

/// Why a single party stopped before finishing its days.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartyFailure {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("thread panicked: {0}")]
    Panicked(String),
    #[error("worker exited without reporting")]
    Lost,
}

impl PartyFailure {
    /// How close this failure sits to the root cause of an abort.
    ///
    /// A broken barrier is always fallout from another party, and a
    /// cancelled wait is fallout unless nobody panicked.
    fn rank(&self) -> u8 {
        match self {
            PartyFailure::Sync(SyncError::BrokenBarrier) => 0,
            PartyFailure::Sync(_) => 1,
            PartyFailure::Lost => 2,
            PartyFailure::Panicked(_) => 3,
        }
    }
}

/// Errors produced by a simulation run. A run never yields a partial tally.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),
    #[error("failed to set up shared state: {0}")]
    Setup(#[from] SyncError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The joint wait for all parties exceeded the configured bound.
    #[error("simulation did not complete within {after:?}")]
    TimedOut { after: Duration },
    /// The caller cancelled the run through its token.
    #[error("simulation was cancelled")]
    Cancelled,
    /// A party failed; the report names the root cause, not its fallout.
    #[error("{party} aborted the simulation: {reason}")]
    Aborted { party: Party, reason: PartyFailure },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dawn_and_dusk_trip_their_own_barrier() {
        let commons = Commons::new(4, 1).unwrap();
        let token = CancelToken::new();
        commons.dawn(1, &token).unwrap();
        assert_eq!((commons.day.generation(), commons.night.generation()), (1, 0));
        commons.dusk(1, &token).unwrap();
        assert_eq!((commons.day.generation(), commons.night.generation()), (1, 1));
        commons.abort();
        assert_eq!(commons.dawn(2, &token), Err(SyncError::BrokenBarrier));
        assert_eq!(commons.dusk(2, &token), Err(SyncError::BrokenBarrier));
    }
}
