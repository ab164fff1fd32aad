//! LGC Benchmarks
//!
//! Benchmark alokasi dan siklus koleksi untuk skenario yang umum pada
//! runtime Lisp. Run dengan: `cargo bench --package lgc`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use lgc::{GarbageCollector, GcConfig, Value, Weakness};

fn create_gc() -> GarbageCollector {
    GarbageCollector::new(GcConfig::default().with_conservative_scan(false)).unwrap()
}

fn bench_gc_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_creation");

    group.bench_function("default_config", |b| {
        b.iter(|| black_box(GarbageCollector::new(GcConfig::default()).unwrap()))
    });

    group.bench_function("no_pure_space", |b| {
        b.iter(|| {
            let config = GcConfig::default().with_pure_size(0);
            black_box(GarbageCollector::new(config).unwrap())
        })
    });

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("cons_1000", |b| {
        let mut gc = create_gc();
        b.iter(|| {
            let mut list = Value::NIL;
            for i in 0..1_000 {
                list = gc.cons(Value::fixnum(i), list).unwrap();
            }
            black_box(list);
            gc.maybe_gc().unwrap();
        })
    });

    group.bench_function("float_1000", |b| {
        let mut gc = create_gc();
        b.iter(|| {
            for i in 0..1_000 {
                black_box(gc.make_float(i as f64).unwrap());
            }
            gc.maybe_gc().unwrap();
        })
    });

    group.bench_function("string_1000", |b| {
        let mut gc = create_gc();
        b.iter(|| {
            for _ in 0..1_000 {
                black_box(gc.make_string(b"the quick brown fox", false).unwrap());
            }
            gc.maybe_gc().unwrap();
        })
    });

    group.bench_function("vector_8_1000", |b| {
        let mut gc = create_gc();
        b.iter(|| {
            for _ in 0..1_000 {
                black_box(gc.make_vector(8, Value::NIL).unwrap());
            }
            gc.maybe_gc().unwrap();
        })
    });

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");
    group.sample_size(20);

    group.bench_function("live_list_100k", |b| {
        let mut gc = create_gc();
        let mut list = Value::NIL;
        for i in 0..100_000 {
            list = gc.cons(Value::fixnum(i), list).unwrap();
        }
        gc.root(list);
        b.iter(|| black_box(gc.garbage_collect().unwrap()))
    });

    group.bench_function("garbage_100k", |b| {
        b.iter_batched(
            || {
                let mut gc = create_gc();
                for i in 0..100_000 {
                    gc.cons(Value::fixnum(i), Value::NIL).unwrap();
                }
                gc
            },
            |mut gc| black_box(gc.garbage_collect().unwrap()),
            BatchSize::LargeInput,
        )
    });

    group.bench_function("string_compaction", |b| {
        b.iter_batched(
            || {
                let mut gc = create_gc();
                let keep = gc.make_vector(1_000, Value::NIL).unwrap();
                gc.root(keep);
                for i in 0..2_000usize {
                    let s = gc.make_string(&vec![b'x'; 16 + i % 64], false).unwrap();
                    if i % 2 == 0 {
                        gc.aset(keep, i / 2, s).unwrap();
                    }
                }
                gc
            },
            |mut gc| black_box(gc.garbage_collect().unwrap()),
            BatchSize::LargeInput,
        )
    });

    group.bench_function("weak_table_10k", |b| {
        b.iter_batched(
            || {
                let mut gc = create_gc();
                let table = gc.make_hash_table(Weakness::Key, 16).unwrap();
                gc.root(table);
                for i in 0..10_000 {
                    let key = gc.make_float(i as f64).unwrap();
                    gc.hash_put(table, key, Value::fixnum(i)).unwrap();
                    if i % 4 == 0 {
                        gc.root(key);
                    }
                }
                gc
            },
            |mut gc| black_box(gc.garbage_collect().unwrap()),
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_gc_creation, bench_allocation, bench_collection);
criterion_main!(benches);
