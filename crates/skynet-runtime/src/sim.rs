use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use skynet_core::{leader, validate_config, SimConfig, ValidationError};
use skynet_sync::{CancelToken, SyncError};
use tracing::{error, info, info_span, warn};

use crate::{Commons, Faction, FactionOutcome, Factory, PartyFailure, ProductionLog, SimError};

/// Which role a worker thread plays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Party {
    Factory,
    Faction(String),
}

impl Party {
    fn thread_name(&self) -> String {
        match self {
            Party::Factory => "skynet-factory".to_string(),
            Party::Faction(name) => format!("skynet-faction-{name}"),
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Factory => f.write_str("factory"),
            Party::Faction(name) => write!(f, "faction {name}"),
        }
    }
}

/// Final tally of a completed run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SimReport {
    /// Seed the factory RNG was built from; replaying it reproduces production.
    pub seed: u64,
    pub working_days: u32,
    /// Parts the factory stored on each day.
    pub produced_per_day: Vec<u32>,
    /// Per-faction outcomes in configuration order.
    pub factions: Vec<FactionOutcome>,
    /// Robots built per faction name.
    pub counts: BTreeMap<String, u32>,
    /// Faction with the unique highest count; `None` on a draw.
    pub winner: Option<String>,
    /// Parts nobody collected.
    pub left_in_storage: usize,
    pub elapsed_ms: u64,
}

impl SimReport {
    pub fn produced_total(&self) -> u64 {
        self.produced_per_day.iter().map(|&n| u64::from(n)).sum()
    }

    pub fn collected_total(&self) -> u64 {
        self.factions.iter().map(FactionOutcome::collected_total).sum()
    }

    pub fn faction(&self, name: &str) -> Option<&FactionOutcome> {
        self.factions.iter().find(|f| f.name == name)
    }

    fn log_results(&self) {
        info!(days = self.working_days, produced = self.produced_total(), "simulation results");
        for f in &self.factions {
            info!(faction = %f.name, robots = f.robots_built, "faction tally");
        }
        match &self.winner {
            Some(name) => info!(winner = %name, "faction wins"),
            None => info!("draw"),
        }
    }
}

/// A configured run that has not started yet.
pub struct Simulation {
    config: SimConfig,
    token: CancelToken,
}

impl Simulation {
    /// Validate `config`; nothing is allocated or spawned on failure.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        validate_config(&config)?;
        Ok(Self {
            config,
            token: CancelToken::new(),
        })
    }

    /// Share cancellation with a token the caller keeps.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// Spawn the factory and every faction, wait for all of them within the
    /// configured timeout, and tally the result.
    pub fn run(self) -> Result<SimReport, SimError> {
        let Simulation { config, token } = self;
        let started = Instant::now();
        let seed = config.rng_seed.unwrap_or_else(rand::random);
        let capacity = config
            .effective_storage_capacity()
            .ok_or(ValidationError::Overflow)?;
        let commons = Commons::new(capacity, config.parties())?;
        info!(
            seed,
            days = config.working_days,
            factions = ?config.factions,
            capacity,
            "simulation starting"
        );

        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(config.parties());
        if let Err(err) = spawn_all(&config, seed, &commons, &token, &tx, &mut handles) {
            error!(error = %err, "could not spawn all parties");
            token.cancel();
            commons.abort();
            join_all(handles);
            return Err(SimError::Spawn(err));
        }
        drop(tx);

        let deadline = started + config.timeout();
        let mut production: Option<ProductionLog> = None;
        let mut outcomes: Vec<Option<FactionOutcome>> =
            config.factions.iter().map(|_| None).collect();
        let mut failure: Option<(Party, PartyFailure)> = None;
        for _ in 0..handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Completion { party, result }) => match result {
                    Ok(Finished::Factory(log)) => production = Some(log),
                    Ok(Finished::Faction(index, outcome)) => outcomes[index] = Some(outcome),
                    Err(reason) => note_failure(&mut failure, party, reason),
                },
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_ms = config.timeout_ms, "simulation did not complete in time");
                    token.cancel();
                    commons.abort();
                    join_all(handles);
                    return Err(SimError::TimedOut {
                        after: config.timeout(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        join_all(handles);

        match failure {
            // Only the caller's token cancels a run in which nobody panicked.
            Some((_, PartyFailure::Sync(SyncError::Cancelled))) => {
                warn!("simulation cancelled");
                return Err(SimError::Cancelled);
            }
            Some((party, reason)) => {
                warn!(%party, %reason, "simulation aborted");
                return Err(SimError::Aborted { party, reason });
            }
            None => {}
        }
        let production = production.ok_or(SimError::Aborted {
            party: Party::Factory,
            reason: PartyFailure::Lost,
        })?;
        let factions = outcomes
            .into_iter()
            .zip(&config.factions)
            .map(|(outcome, name)| {
                outcome.ok_or_else(|| SimError::Aborted {
                    party: Party::Faction(name.clone()),
                    reason: PartyFailure::Lost,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let counts = factions
            .iter()
            .map(|f| (f.name.clone(), f.robots_built))
            .collect();
        let winner =
            leader(factions.iter().map(|f| (f.name.as_str(), f.robots_built))).map(str::to_owned);
        let report = SimReport {
            seed,
            working_days: config.working_days,
            produced_per_day: production.per_day,
            factions,
            counts,
            winner,
            left_in_storage: commons.storage.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        report.log_results();
        Ok(report)
    }
}

/// Validate, run and tally one simulation.
pub fn run_simulation(config: &SimConfig) -> Result<SimReport, SimError> {
    Simulation::new(config.clone())?.run()
}

enum Finished {
    Factory(ProductionLog),
    Faction(usize, FactionOutcome),
}

struct Completion {
    party: Party,
    result: Result<Finished, PartyFailure>,
}

fn spawn_all(
    config: &SimConfig,
    seed: u64,
    commons: &Commons,
    token: &CancelToken,
    tx: &Sender<Completion>,
    handles: &mut Vec<(Party, JoinHandle<()>)>,
) -> io::Result<()> {
    let factory = Factory::new(
        commons.clone(),
        config.working_days,
        config.max_parts_per_day,
        ChaCha8Rng::seed_from_u64(seed),
    );
    let handle = spawn_party(Party::Factory, commons, token, tx, move |token| {
        factory.run(token).map(Finished::Factory)
    })?;
    handles.push((Party::Factory, handle));

    for (index, name) in config.factions.iter().enumerate() {
        let faction = Faction::new(
            name.clone(),
            commons.clone(),
            config.working_days,
            config.faction_capacity_per_day,
        );
        let party = Party::Faction(name.clone());
        let handle = spawn_party(party.clone(), commons, token, tx, move |token| {
            faction
                .run(token)
                .map(|outcome| Finished::Faction(index, outcome))
        })?;
        handles.push((party, handle));
    }
    Ok(())
}

/// Run `body` on a named thread. Any error or panic cancels the run and
/// breaks both barriers before the result is reported.
fn spawn_party<F>(
    party: Party,
    commons: &Commons,
    token: &CancelToken,
    tx: &Sender<Completion>,
    body: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(&CancelToken) -> Result<Finished, SyncError> + Send + 'static,
{
    let commons = commons.clone();
    let token = token.clone();
    let tx = tx.clone();
    thread::Builder::new()
        .name(party.thread_name())
        .spawn(move || {
            let span = info_span!("party", name = %party);
            let _entered = span.enter();
            let result = match panic::catch_unwind(AssertUnwindSafe(|| body(&token))) {
                Ok(Ok(done)) => Ok(done),
                Ok(Err(err)) => Err(PartyFailure::Sync(err)),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(panic = %message, "party panicked");
                    Err(PartyFailure::Panicked(message))
                }
            };
            if result.is_err() {
                token.cancel();
                commons.abort();
            }
            // The receiver only goes away after the coordinator gave up waiting.
            let _ = tx.send(Completion { party, result });
        })
}

/// Keep the failure closest to the root cause. Ties go to the first report.
fn note_failure(slot: &mut Option<(Party, PartyFailure)>, party: Party, reason: PartyFailure) {
    let replace = match slot {
        Some((_, held)) => reason.rank() > held.rank(),
        None => true,
    };
    if replace {
        *slot = Some((party, reason));
    }
}

fn join_all(handles: Vec<(Party, JoinHandle<()>)>) {
    for (party, handle) in handles {
        if handle.join().is_err() {
            error!(%party, "worker thread panicked while reporting");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
