//! Criterion benchmarks for the dictionary hot paths.
//!
//! Run with:
//!   cargo bench --bench dict

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvcore::dict::StringKeys;
use kvcore::Dict;

fn filled(n: usize) -> (Dict<StringKeys<u64>>, Vec<String>) {
    let mut d = Dict::with_type(StringKeys::<u64>::default());
    let keys: Vec<String> = (0..n).map(|i| format!("key:{i:08}")).collect();
    for (i, k) in keys.iter().enumerate() {
        d.insert(k.clone(), i as u64).unwrap();
    }
    // Settle any in-flight migration so lookups measure steady state.
    while d.is_rehashing() {
        d.rehash(1024);
    }
    (d, keys)
}

fn bench_dict(c: &mut Criterion) {
    let mut group = c.benchmark_group("dict");

    for &n in &[1_000usize, 100_000] {
        group.throughput(Throughput::Elements(n as u64));

        // ── insert, including every incremental-rehash step on the way ──────
        group.bench_with_input(BenchmarkId::new("insert", n), &n, |b, &n| {
            let keys: Vec<String> = (0..n).map(|i| format!("key:{i:08}")).collect();
            b.iter(|| {
                let mut d = Dict::with_type(StringKeys::<u64>::default());
                for (i, k) in keys.iter().enumerate() {
                    d.insert(k.clone(), i as u64).unwrap();
                }
                d
            })
        });

        // ── find on a settled table ─────────────────────────────────────────
        group.bench_with_input(BenchmarkId::new("find", n), &n, |b, &n| {
            let (mut d, keys) = filled(n);
            b.iter(|| {
                let mut hits = 0u64;
                for k in &keys {
                    if d.get(black_box(k)).is_some() {
                        hits += 1;
                    }
                }
                hits
            })
        });

        // ── full cursor scan ────────────────────────────────────────────────
        group.bench_with_input(BenchmarkId::new("scan", n), &n, |b, &n| {
            let (mut d, _keys) = filled(n);
            b.iter(|| {
                let mut count = 0u64;
                let mut cursor = 0;
                loop {
                    cursor = d.scan(cursor, |_, _| count += 1);
                    if cursor == 0 {
                        break;
                    }
                }
                count
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dict);
criterion_main!(benches);
