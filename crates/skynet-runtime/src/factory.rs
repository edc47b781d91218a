use rand::Rng;
use serde::Serialize;
use skynet_core::Part;
use skynet_sync::{CancelToken, SyncError};
use tracing::{debug, info, warn};

use crate::Commons;

/// Parts produced on each simulated day, in day order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProductionLog {
    pub per_day: Vec<u32>,
}

impl ProductionLog {
    pub fn total(&self) -> u64 {
        self.per_day.iter().map(|&n| u64::from(n)).sum()
    }
}

/// The single producer. Each day it stores a random batch of parts, then
/// arrives at the day barrier and the night barrier.
///
/// The random source is injected so runs can be replayed from a seed.
pub struct Factory<R> {
    working_days: u32,
    max_parts_per_day: u32,
    rng: R,
    commons: Commons,
}

impl<R: Rng> Factory<R> {
    /// `max_parts_per_day` must be non-zero; `validate_config` guarantees
    /// that for configured runs.
    pub fn new(commons: Commons, working_days: u32, max_parts_per_day: u32, rng: R) -> Self {
        debug_assert!(max_parts_per_day > 0, "empty daily batch range");
        Self {
            working_days,
            max_parts_per_day,
            rng,
            commons,
        }
    }

    /// Run every working day on the calling thread.
    ///
    /// Stops at the first cancelled or broken wait and produces nothing more.
    pub fn run(mut self, token: &CancelToken) -> Result<ProductionLog, SyncError> {
        info!(days = self.working_days, "factory is starting");
        let mut log = ProductionLog::default();
        match self.shifts(token, &mut log) {
            Ok(()) => {
                debug!(
                    days = self.working_days,
                    total = log.total(),
                    "factory has finished its work"
                );
                Ok(log)
            }
            Err(err) => {
                warn!(day = log.per_day.len() + 1, error = %err, "factory was interrupted");
                Err(err)
            }
        }
    }

    fn shifts(&mut self, token: &CancelToken, log: &mut ProductionLog) -> Result<(), SyncError> {
        for day in 1..=self.working_days {
            let produced = self.produce_day(token)?;
            info!(day, produced, "factory produced parts");
            log.per_day.push(produced);
            self.commons.dawn(day, token)?;
            self.commons.dusk(day, token)?;
        }
        Ok(())
    }

    /// Store a batch of uniformly random size in `[1, max_parts_per_day]`.
    fn produce_day(&mut self, token: &CancelToken) -> Result<u32, SyncError> {
        let batch = self.rng.gen_range(1..=self.max_parts_per_day);
        for _ in 0..batch {
            let part: Part = self.rng.gen();
            self.commons.storage.put(part, token)?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn solo_factory_fills_storage() {
        let commons = Commons::new(200, 1).unwrap();
        let factory = Factory::new(commons.clone(), 20, 10, ChaCha8Rng::seed_from_u64(3));
        let log = factory.run(&CancelToken::new()).unwrap();
        assert_eq!(log.per_day.len(), 20);
        assert!(log.per_day.iter().all(|&n| (1..=10).contains(&n)));
        assert_eq!(commons.storage.len() as u64, log.total());
        assert_eq!(commons.day.generation(), 20);
        assert_eq!(commons.night.generation(), 20);
    }

    #[test]
    fn seed_fixes_production() {
        let run = |seed| {
            let commons = Commons::new(100, 1).unwrap();
            Factory::new(commons, 10, 10, ChaCha8Rng::seed_from_u64(seed))
                .run(&CancelToken::new())
                .unwrap()
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn cancelled_factory_produces_nothing() {
        let commons = Commons::new(100, 1).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let factory = Factory::new(commons.clone(), 10, 10, ChaCha8Rng::seed_from_u64(1));
        assert_eq!(factory.run(&token), Err(SyncError::Cancelled));
        assert!(commons.storage.is_empty());
    }

    #[test]
    #[should_panic]
    fn zero_batch_bound_is_rejected() {
        let commons = Commons::new(10, 1).unwrap();
        let _ = Factory::new(commons, 1, 0, ChaCha8Rng::seed_from_u64(1)).run(&CancelToken::new());
    }

    #[test]
    fn broken_barrier_stops_production() {
        let commons = Commons::new(100, 2).unwrap();
        commons.day.abort();
        let factory = Factory::new(commons.clone(), 10, 4, ChaCha8Rng::seed_from_u64(5));
        assert_eq!(factory.run(&CancelToken::new()), Err(SyncError::BrokenBarrier));
        // Only the first day's batch made it in before the barrier refused.
        assert!((1..=4).contains(&commons.storage.len()));
    }
}
