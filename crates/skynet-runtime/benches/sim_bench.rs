use criterion::{black_box, criterion_group, criterion_main, Criterion};
use skynet_core::SimConfig;

fn bench_race(c: &mut Criterion) {
    let cfg = SimConfig {
        working_days: 100,
        rng_seed: Some(42),
        ..SimConfig::default()
    };
    c.bench_function("race 2 factions x 100 days", |b| {
        b.iter(|| {
            let report = skynet_runtime::run_simulation(black_box(&cfg)).unwrap();
            black_box(report.counts)
        })
    });

    let crowded = SimConfig {
        factions: (0..8).map(|i| format!("F{i}")).collect(),
        ..cfg.clone()
    };
    c.bench_function("race 8 factions x 100 days", |b| {
        b.iter(|| {
            let report = skynet_runtime::run_simulation(black_box(&crowded)).unwrap();
            black_box(report.counts)
        })
    });
}

criterion_group!(benches, bench_race);
criterion_main!(benches);
