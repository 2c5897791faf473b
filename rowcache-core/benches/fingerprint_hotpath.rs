use criterion::{criterion_group, criterion_main, Criterion};
use rowcache_core::{CompiledQuery, RowKey};
use std::hint::black_box;

fn wide_query(params: usize) -> CompiledQuery {
    let mut query = CompiledQuery::new(
        "user",
        "SELECT user.id, user.name, user.count FROM user WHERE user.id IN (:ids) AND user.name = :name",
    );
    for i in 0..params {
        query = query.bind(format!("p_{}", i), i as i64);
    }
    query
}

fn bench_fingerprint(c: &mut Criterion) {
    let narrow = wide_query(2);
    let wide = wide_query(64);

    c.bench_function("fingerprint/narrow", |b| {
        b.iter(|| black_box(black_box(&narrow).fingerprint()));
    });

    c.bench_function("fingerprint/wide", |b| {
        b.iter(|| black_box(black_box(&wide).fingerprint()));
    });
}

fn bench_row_key(c: &mut Criterion) {
    c.bench_function("row_key/for_value", |b| {
        b.iter(|| black_box(RowKey::for_value("user", "id", black_box("123456"))));
    });
}

criterion_group!(benches, bench_fingerprint, bench_row_key);
criterion_main!(benches);
