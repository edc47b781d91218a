#![deny(warnings)]

//! Headless CLI: runs one robot race and prints the tally.

use anyhow::{bail, Context, Result};
use skynet_core::SimConfig;
use skynet_runtime::{run_simulation, SimReport};
use std::fs;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    scenario: Option<String>,
    days: Option<u32>,
    max_parts: Option<u32>,
    capacity: Option<u32>,
    factions: Vec<String>,
    seed: Option<u64>,
    timeout_ms: Option<u64>,
    json: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(raw: I) -> Result<Args> {
    let mut args = Args::default();
    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = Some(value(&mut it, &arg)?),
            "--days" => args.days = Some(parse(&mut it, &arg)?),
            "--max-parts" => args.max_parts = Some(parse(&mut it, &arg)?),
            "--capacity" => args.capacity = Some(parse(&mut it, &arg)?),
            "--faction" => args.factions.push(value(&mut it, &arg)?),
            "--seed" => args.seed = Some(parse(&mut it, &arg)?),
            "--timeout-ms" => args.timeout_ms = Some(parse(&mut it, &arg)?),
            "--json" => args.json = true,
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    it.next().with_context(|| format!("{flag} expects a value"))
}

fn parse<T>(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = value(it, flag)?;
    raw.parse()
        .with_context(|| format!("invalid value for {flag}: {raw}"))
}

/// Scenario file first, then command-line overrides on top.
fn load_config(args: Args) -> Result<SimConfig> {
    let mut cfg = match &args.scenario {
        Some(path) => {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading scenario {path}"))?;
            serde_yaml::from_str::<SimConfig>(&text)
                .with_context(|| format!("parsing scenario {path}"))?
        }
        None => SimConfig::default(),
    };
    if let Some(days) = args.days {
        cfg.working_days = days;
    }
    if let Some(max) = args.max_parts {
        cfg.max_parts_per_day = max;
    }
    if let Some(capacity) = args.capacity {
        cfg.faction_capacity_per_day = capacity;
    }
    if !args.factions.is_empty() {
        cfg.factions = args.factions;
    }
    if args.seed.is_some() {
        cfg.rng_seed = args.seed;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.timeout_ms = ms;
    }
    Ok(cfg)
}

fn print_report(report: &SimReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "Simulation results | days: {} | seed: {} | produced: {} | collected: {} | left: {}",
        report.working_days,
        report.seed,
        report.produced_total(),
        report.collected_total(),
        report.left_in_storage
    );
    for f in &report.factions {
        println!(
            "Faction {}: {} robots | collected: {} | leftover parts: {}",
            f.name,
            f.robots_built,
            f.collected_total(),
            f.leftover.total()
        );
    }
    match &report.winner {
        Some(name) => println!("Faction {name} wins"),
        None => println!("Draw"),
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup; stdout is reserved for the report
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    info!(git_sha = env!("GIT_SHA"), ?args, "starting CLI");
    let json = args.json;
    let cfg = load_config(args)?;
    let report = run_simulation(&cfg).context("simulation failed")?;
    print_report(&report, json)
}
