use criterion::{criterion_group, criterion_main, Criterion};
use tasklet_engine::{Engine, EngineConfig};

fn submit_join_round_trip(c: &mut Criterion) {
    let mut cfg = EngineConfig::default();
    cfg.initial_workers = 4;
    cfg.controller_interval_ms = 60_000;
    let engine = Engine::new(cfg).unwrap();

    c.bench_function("submit_join_single", |b| {
        b.iter(|| {
            let id = engine.submit(|| Ok(Vec::new())).unwrap();
            engine.join(id).unwrap();
        });
    });

    c.bench_function("submit_join_batch_100", |b| {
        b.iter(|| {
            let ids = engine
                .submit_batch(100, |_| Box::new(|| Ok(Vec::new())))
                .unwrap();
            engine.join_batch(&ids).unwrap();
        });
    });
}

criterion_group!(benches, submit_join_round_trip);
criterion_main!(benches);
