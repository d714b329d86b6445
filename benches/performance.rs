use criterion::{criterion_group, criterion_main, Criterion};
use scalarpool::{plan_drain, Evaluator, MemoryDriver, PoolConfig};

fn expressions(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("ST_Azimuth(ST_GeogFromText('POINT({i} 0)'),ST_GeogFromText('POINT(0 {i})'))"))
        .collect()
}

fn bench_plan_drain(c: &mut Criterion) {
    let small = expressions(64);
    let wide = expressions(5000);
    c.bench_function("plan_drain_64x8", |b| {
        b.iter(|| plan_drain(&small, 8, 1663))
    });
    c.bench_function("plan_drain_5000x1", |b| {
        b.iter(|| plan_drain(&wide, 1, 1663))
    });
}

fn bench_memory_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut config = PoolConfig::new("memory");
    config.max_connections = 4;
    let evaluator = runtime
        .block_on(async { Evaluator::new(config, MemoryDriver::new()) })
        .unwrap();
    let exprs = expressions(256);

    c.bench_function("evaluate_256_memory", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let pending: Vec<_> = exprs.iter().map(|e| evaluator.evaluate(e.as_str())).collect();
                for value in pending {
                    let _ = value.await.unwrap();
                }
            })
        })
    });
}

criterion_group!(batching, bench_plan_drain, bench_memory_round_trip);
criterion_main!(batching);
