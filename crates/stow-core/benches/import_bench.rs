//! # Import Benchmarks
//!
//! Throughput of bulk JSON import and cascade cleanup.
//!
//! Run with: `cargo bench -p stow-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;
use stow_core::{FieldMapping, RecordType, Schema, Session};

fn schema() -> Schema {
    Schema::new([
        RecordType::new("User")
            .primary_key("id")
            .field(FieldMapping::int("id"))
            .field(FieldMapping::text("name"))
            .field(FieldMapping::list("dogs", "Dog"))
            .dependents(["Dog"]),
        RecordType::new("Dog")
            .primary_key("id")
            .field(FieldMapping::int("id"))
            .field(FieldMapping::text("color")),
    ])
    .expect("schema")
}

/// N users, each owning three dogs shared with the next user.
fn users(size: usize) -> Value {
    let docs: Vec<Value> = (0..size as i64)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("user-{i}"),
                "dogs": [
                    {"id": i, "color": "black"},
                    {"id": i + 1, "color": "white"},
                    {"id": i + 2, "color": "brown"},
                ],
            })
        })
        .collect();
    Value::Array(docs)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_fresh_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("fresh_import");
    for size in [100, 1_000] {
        let doc = users(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &doc, |b, doc| {
            b.iter(|| {
                let mut session = Session::new(schema());
                black_box(session.import("User", doc).expect("import"));
            });
        });
    }
    group.finish();
}

fn bench_reimport(c: &mut Criterion) {
    let mut group = c.benchmark_group("reimport");
    for size in [100, 1_000] {
        let doc = users(size);
        let mut session = Session::new(schema());
        session.import("User", &doc).expect("seed");
        group.bench_with_input(BenchmarkId::from_parameter(size), &doc, |b, doc| {
            b.iter(|| black_box(session.import("User", doc).expect("import")));
        });
    }
    group.finish();
}

fn bench_delete_with_cleanup(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete_with_cleanup");
    for size in [100, 500] {
        let doc = users(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &doc, |b, doc| {
            b.iter(|| {
                let mut session = Session::new(schema());
                session.import("User", doc).expect("seed");
                black_box(
                    session
                        .write(|s| s.delete_all_of("User"))
                        .expect("delete"),
                );
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fresh_import,
    bench_reimport,
    bench_delete_with_cleanup
);
criterion_main!(benches);
