#![deny(warnings)]

//! Core domain models and invariants for the skynet robot race.
//!
//! This crate defines the part catalog, the robot recipe, per-faction
//! inventories and the simulation configuration, together with validation
//! helpers and winner determination. Nothing here touches threads; the
//! concurrent machinery lives in `skynet-sync` and `skynet-runtime`.

use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

/// Default number of simulated days.
pub const DEFAULT_WORKING_DAYS: u32 = 100;
/// Default upper bound of parts the factory produces per day.
pub const DEFAULT_MAX_PARTS_PER_DAY: u32 = 10;
/// Default number of parts a faction can carry away per day.
pub const DEFAULT_FACTION_CAPACITY: u32 = 5;
/// Default wall-clock bound for a whole run.
pub const DEFAULT_TIMEOUT_MS: u64 = 100_000;

/// Kinds of robot parts the factory produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    /// Robot head.
    Head,
    /// Robot torso.
    Torso,
    /// Robot hand; a robot needs two.
    Hand,
    /// Robot foot.
    Foot,
}

impl Part {
    /// Number of distinct part kinds.
    pub const COUNT: usize = 4;
    /// Every part kind, in catalog order.
    pub const ALL: [Part; Part::COUNT] = [Part::Head, Part::Torso, Part::Hand, Part::Foot];

    /// Dense index of this kind in `0..Part::COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Uniform draw over [`Part::ALL`].
impl Distribution<Part> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Part {
        Part::ALL[rng.gen_range(0..Part::COUNT)]
    }
}

/// Quantities of each part kind needed to assemble one robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recipe {
    needs: [u32; Part::COUNT],
}

impl Recipe {
    /// The standard robot: one head, one torso, two hands, one foot.
    pub const ROBOT: Recipe = Recipe::from_counts([1, 1, 2, 1]);

    /// Build a recipe from per-kind requirements in [`Part::ALL`] order.
    pub const fn from_counts(needs: [u32; Part::COUNT]) -> Self {
        Self { needs }
    }

    /// Required count of `part`.
    pub const fn required(&self, part: Part) -> u32 {
        self.needs[part.index()]
    }

    /// Non-zero requirements as `(part, count)` pairs.
    pub fn requirements(&self) -> impl Iterator<Item = (Part, u32)> + '_ {
        Part::ALL
            .iter()
            .map(|&p| (p, self.required(p)))
            .filter(|&(_, n)| n > 0)
    }

    /// A recipe that requires nothing cannot be assembled meaningfully.
    pub fn is_empty(&self) -> bool {
        self.needs.iter().all(|&n| n == 0)
    }
}

/// Per-kind part counts held privately by one faction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BTreeMap<Part, u32>", from = "BTreeMap<Part, u32>")]
pub struct Inventory {
    counts: [u32; Part::COUNT],
}

impl Inventory {
    /// Empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory with explicit counts in [`Part::ALL`] order.
    pub const fn from_counts(counts: [u32; Part::COUNT]) -> Self {
        Self { counts }
    }

    /// Add one part.
    ///
    /// Counts top out at `u32::MAX` per kind, far beyond what a run can
    /// collect. Debug builds assert on overflow; release builds saturate.
    pub fn add(&mut self, part: Part) {
        let slot = &mut self.counts[part.index()];
        let next = slot.checked_add(1);
        debug_assert!(next.is_some(), "{part:?} count overflow");
        *slot = next.unwrap_or(u32::MAX);
    }

    /// Current count of `part`.
    pub fn count(&self, part: Part) -> u32 {
        self.counts[part.index()]
    }

    /// Total number of parts held.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&n| u64::from(n)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&n| n == 0)
    }

    /// Whether every requirement of `recipe` is covered.
    pub fn can_build(&self, recipe: &Recipe) -> bool {
        Part::ALL
            .iter()
            .all(|&p| self.count(p) >= recipe.required(p))
    }

    /// Remove one recipe's worth of parts. Returns `false` and leaves the
    /// inventory untouched when the recipe is not covered.
    pub fn consume(&mut self, recipe: &Recipe) -> bool {
        if !self.can_build(recipe) {
            return false;
        }
        for (part, needed) in recipe.requirements() {
            self.counts[part.index()] -= needed;
        }
        true
    }

    /// Greedily assemble as many products as the inventory allows and return
    /// how many were built. No lookahead: parts are subtracted one recipe at
    /// a time until a requirement is no longer met.
    pub fn assemble(&mut self, recipe: &Recipe) -> u32 {
        if recipe.is_empty() {
            return 0;
        }
        let mut built = 0;
        while self.consume(recipe) {
            built += 1;
        }
        built
    }
}

impl Extend<Part> for Inventory {
    fn extend<I: IntoIterator<Item = Part>>(&mut self, parts: I) {
        for part in parts {
            self.add(part);
        }
    }
}

impl From<Inventory> for BTreeMap<Part, u32> {
    fn from(inv: Inventory) -> Self {
        Part::ALL.iter().map(|&p| (p, inv.count(p))).collect()
    }
}

impl From<BTreeMap<Part, u32>> for Inventory {
    fn from(map: BTreeMap<Part, u32>) -> Self {
        let mut inv = Inventory::new();
        for (part, n) in map {
            inv.counts[part.index()] = n;
        }
        inv
    }
}

/// Simulation configuration parameters.
///
/// Every field has a default, so scenario files only need to name what they
/// change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Number of simulated days (> 0).
    pub working_days: u32,
    /// Upper bound of the factory's daily batch (> 0); batches are uniform in `[1, max]`.
    pub max_parts_per_day: u32,
    /// Parts each faction may drain from storage per day (> 0).
    pub faction_capacity_per_day: u32,
    /// Competing faction names; at least two, unique, non-blank.
    pub factions: Vec<String>,
    /// Seed for the factory RNG; drawn from entropy when absent.
    pub rng_seed: Option<u64>,
    /// Storage capacity override; must still cover worst-case production.
    pub storage_capacity: Option<usize>,
    /// Wall-clock bound for the whole run in milliseconds (> 0).
    pub timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            working_days: DEFAULT_WORKING_DAYS,
            max_parts_per_day: DEFAULT_MAX_PARTS_PER_DAY,
            faction_capacity_per_day: DEFAULT_FACTION_CAPACITY,
            factions: vec!["World".to_string(), "Wednesday".to_string()],
            rng_seed: None,
            storage_capacity: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SimConfig {
    /// Most parts the factory can ever produce: `working_days * max_parts_per_day`.
    pub fn worst_case_production(&self) -> Option<usize> {
        usize::try_from(self.working_days)
            .ok()?
            .checked_mul(usize::try_from(self.max_parts_per_day).ok()?)
    }

    /// Capacity the shared storage is built with.
    pub fn effective_storage_capacity(&self) -> Option<usize> {
        self.storage_capacity
            .or_else(|| self.worst_case_production())
    }

    /// Barrier parties: the factory plus every faction.
    pub fn parties(&self) -> usize {
        1 + self.factions.len()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Validation errors for configuration invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("working days must be > 0")]
    ZeroDays,
    #[error("max parts per day must be > 0")]
    ZeroMaxParts,
    #[error("faction capacity per day must be > 0")]
    ZeroCapacity,
    /// The race needs at least two competitors.
    #[error("at least two factions are required, got {0}")]
    TooFewFactions(usize),
    #[error("faction name must not be blank")]
    EmptyFactionName,
    #[error("duplicate faction name: {0}")]
    DuplicateFaction(String),
    /// Storage smaller than worst-case production could wedge the factory in
    /// `put` while every faction waits at a barrier.
    #[error("storage capacity {capacity} is below worst-case production {required}")]
    StorageUndersized { capacity: usize, required: usize },
    #[error("timeout must be > 0 ms")]
    ZeroTimeout,
    #[error("days x parts per day overflows")]
    Overflow,
}

/// Validate a simulation configuration before anything is allocated.
pub fn validate_config(cfg: &SimConfig) -> Result<(), ValidationError> {
    if cfg.working_days == 0 {
        return Err(ValidationError::ZeroDays);
    }
    if cfg.max_parts_per_day == 0 {
        return Err(ValidationError::ZeroMaxParts);
    }
    if cfg.faction_capacity_per_day == 0 {
        return Err(ValidationError::ZeroCapacity);
    }
    if cfg.timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout);
    }
    if cfg.factions.len() < 2 {
        return Err(ValidationError::TooFewFactions(cfg.factions.len()));
    }
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for name in &cfg.factions {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyFactionName);
        }
        if !seen.insert(name.as_str()) {
            return Err(ValidationError::DuplicateFaction(name.clone()));
        }
    }
    let required = cfg
        .worst_case_production()
        .ok_or(ValidationError::Overflow)?;
    let capacity = cfg.effective_storage_capacity().unwrap_or(required);
    if capacity < required {
        return Err(ValidationError::StorageUndersized { capacity, required });
    }
    Ok(())
}

/// Outcome of a head-to-head comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winner {
    First,
    Second,
}

/// Compare two robot counts. A draw yields `None`.
pub fn determine_winner(first: u32, second: u32) -> Option<Winner> {
    match first.cmp(&second) {
        Ordering::Greater => Some(Winner::First),
        Ordering::Less => Some(Winner::Second),
        Ordering::Equal => None,
    }
}

/// Name holding the unique highest count, or `None` when the top is shared
/// or there are no entries.
pub fn leader<'a, I>(standings: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let mut best: Option<(&'a str, u32)> = None;
    let mut tied = false;
    for (name, count) in standings {
        match best {
            Some((_, top)) if count < top => {}
            Some((_, top)) if count == top => tied = true,
            _ => {
                best = Some((name, count));
                tied = false;
            }
        }
    }
    if tied {
        None
    } else {
        best.map(|(name, _)| name)
    }
}
