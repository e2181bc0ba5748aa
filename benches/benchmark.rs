use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use nestdb::collection::{Collection, SortBy};
use nestdb::datatype::Value;
use serde_json::json;

fn seeded(n: usize) -> Collection {
    Collection::from_values((0..n).map(|i| json!({"n": i, "group": i % 10, "name": format!("r{}", i)})))
        .expect("import ok")
}

fn with_structures(n: usize) -> Collection {
    let mut db = seeded(n);
    db.add_index("name", Arc::new(|v: &Value| v.get("name").map(|n| n.to_string())))
        .expect("index ok");
    db.add_hash("group", Arc::new(|v: &Value| v.get("group").map(|g| g.to_string())))
        .expect("hash ok");
    db.add_view("even", Arc::new(|v: &Value| {
        v.get("n").and_then(Value::as_f64).is_some_and(|n| n % 2.0 == 0.0)
    }))
    .expect("view ok");
    db
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("insert 1k", |b| b.iter(|| black_box(seeded(1_000))));

    let mut db = seeded(10_000);
    c.bench_function("select 10k", |b| {
        b.iter(|| {
            db.select("n", "><", [2_000, 4_000])
                .expect("query ok")
                .or("group", "=", 3)
                .expect("query ok")
                .fetch()
                .len()
        })
    });

    let mut db = with_structures(10_000);
    c.bench_function("rebuild 10k", |b| b.iter(|| db.rebuild_indexes()));

    let mut db = with_structures(1_000);
    c.bench_function("maintained insert", |b| {
        b.iter(|| db.insert(json!({"n": 7, "group": 7, "name": "extra"})).expect("insert ok"))
    });

    let db = seeded(10_000);
    c.bench_function("sorted 10k", |b| b.iter(|| db.sorted(SortBy::field("name")).len()));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
