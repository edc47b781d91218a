use serde::Serialize;
use skynet_core::{Inventory, Recipe};
use skynet_sync::{CancelToken, SyncError};
use tracing::{debug, info, warn};

use crate::Commons;

/// Final state of a faction after all of its days completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FactionOutcome {
    pub name: String,
    pub robots_built: u32,
    /// Parts drained from storage on each day.
    pub collected_per_day: Vec<u32>,
    /// Robots assembled on each day.
    pub built_per_day: Vec<u32>,
    /// Parts still in the private inventory at the end.
    pub leftover: Inventory,
}

impl FactionOutcome {
    pub fn collected_total(&self) -> u64 {
        self.collected_per_day.iter().map(|&n| u64::from(n)).sum()
    }
}

/// A competitor that collects parts during the day and builds robots from
/// them before night falls.
///
/// The inventory and robot counter belong to the thread running
/// [`Faction::run`]; the count only leaves it inside the returned
/// [`FactionOutcome`].
pub struct Faction {
    name: String,
    working_days: u32,
    capacity_per_day: u32,
    inventory: Inventory,
    robots_built: u32,
    collected_per_day: Vec<u32>,
    built_per_day: Vec<u32>,
    commons: Commons,
}

impl Faction {
    pub fn new(
        name: impl Into<String>,
        commons: Commons,
        working_days: u32,
        capacity_per_day: u32,
    ) -> Self {
        Self {
            name: name.into(),
            working_days,
            capacity_per_day,
            inventory: Inventory::new(),
            robots_built: 0,
            collected_per_day: Vec::new(),
            built_per_day: Vec::new(),
            commons,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every working day on the calling thread.
    ///
    /// A cancelled or broken barrier wait ends the run before that day's
    /// collection and assembly.
    pub fn run(mut self, token: &CancelToken) -> Result<FactionOutcome, SyncError> {
        info!(faction = %self.name, "faction is starting");
        match self.shifts(token) {
            Ok(()) => {
                debug!(faction = %self.name, robots = self.robots_built, "faction finished");
                Ok(self.into_outcome())
            }
            Err(err) => {
                warn!(faction = %self.name, error = %err, "faction was interrupted");
                Err(err)
            }
        }
    }

    fn shifts(&mut self, token: &CancelToken) -> Result<(), SyncError> {
        for day in 1..=self.working_days {
            self.commons.dawn(day, token)?;
            let collected = self.collect();
            let built = self.build();
            debug!(faction = %self.name, day, collected, built, "faction shift complete");
            self.collected_per_day.push(collected);
            self.built_per_day.push(built);
            self.commons.dusk(day, token)?;
        }
        Ok(())
    }

    /// Take up to the daily capacity from storage; never waits for more.
    fn collect(&mut self) -> u32 {
        let drained = self
            .commons
            .storage
            .drain_up_to(self.capacity_per_day as usize);
        let collected = drained.len() as u32;
        self.inventory.extend(drained);
        collected
    }

    fn build(&mut self) -> u32 {
        let built = self.inventory.assemble(&Recipe::ROBOT);
        self.robots_built += built;
        built
    }

    fn into_outcome(self) -> FactionOutcome {
        FactionOutcome {
            name: self.name,
            robots_built: self.robots_built,
            collected_per_day: self.collected_per_day,
            built_per_day: self.built_per_day,
            leftover: self.inventory,
        }
    }
}
