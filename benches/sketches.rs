#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use parsketch::{
    CountMin, CountMinArgs, HeavyHitters, HeavyHittersArgs, HyperLogLog, HyperLogLogArgs,
    SharedSketch,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

fn generate_keys(count: usize) -> Vec<[u8; 8]> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count).map(|_| rng.gen::<u64>().to_le_bytes()).collect()
}

fn bench_adds(c: &mut Criterion) {
    let keys = generate_keys(10_000);

    let mut group = c.benchmark_group("Sketch Add");
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("cms_add", |b| {
        let mut cms = CountMin::create(&CountMinArgs {
            width: 1 << 16,
            depth: 4,
        })
        .expect("create cms");
        b.iter(|| {
            for key in &keys {
                cms.add(black_box(key), 1);
            }
        });
    });

    group.bench_function("hh_add", |b| {
        let mut hh = HeavyHitters::create(&HeavyHittersArgs {
            width: 1 << 12,
            depth: 4,
            max_key_len: 8,
            phi: 0.001,
        })
        .expect("create hh");
        b.iter(|| {
            for key in &keys {
                hh.add(black_box(key), 1);
            }
        });
    });

    group.bench_function("hll_add", |b| {
        let mut hll = HyperLogLog::create(&HyperLogLogArgs { p: 14, seed: 0 }).expect("create hll");
        b.iter(|| {
            for key in &keys {
                hll.add(black_box(key));
            }
        });
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let keys = generate_keys(10_000);

    let mut cms = CountMin::create(&CountMinArgs {
        width: 1 << 16,
        depth: 4,
    })
    .expect("create cms");
    let mut hll = HyperLogLog::create(&HyperLogLogArgs { p: 14, seed: 0 }).expect("create hll");
    for key in &keys {
        cms.add(key, 1);
        hll.add(key);
    }

    let mut group = c.benchmark_group("Sketch Query");

    group.bench_function("cms_query", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(cms.query(black_box(key)));
            }
        });
    });

    group.bench_function("hll_query", |b| {
        b.iter(|| black_box(hll.query()));
    });

    group.finish();
}

fn bench_merges(c: &mut Criterion) {
    let keys = generate_keys(10_000);

    let mut group = c.benchmark_group("Sketch Merge");

    group.bench_function("cms_merge", |b| {
        let args = CountMinArgs {
            width: 1 << 16,
            depth: 4,
        };
        let mut left = CountMin::create(&args).expect("create cms");
        let mut right = CountMin::create(&args).expect("create cms");
        for key in &keys {
            left.add(key, 1);
            right.add(key, 1);
        }
        b.iter(|| left.merge(black_box(&right)).expect("merge cms"));
    });

    group.bench_function("hll_merge", |b| {
        let args = HyperLogLogArgs { p: 14, seed: 0 };
        let mut left = HyperLogLog::create(&args).expect("create hll");
        let mut right = HyperLogLog::create(&args).expect("create hll");
        for key in &keys {
            left.add(key);
            right.add(key);
        }
        b.iter(|| left.merge(black_box(&right)).expect("merge hll"));
    });

    group.finish();
}

criterion_group!(benches, bench_adds, bench_queries, bench_merges);
criterion_main!(benches);
