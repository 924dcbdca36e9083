//! Benchmarks for fingerprint hashing throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use testdb_core::RecursiveHash;

fn bench_fingerprint(c: &mut Criterion) {
    let migration = "CREATE TABLE cats (id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY, name TEXT);".repeat(64);

    let mut group = c.benchmark_group("fingerprint");
    group.bench_function("fields", |b| {
        b.iter(|| {
            let hash = RecursiveHash::with_fields([
                ("Username", black_box("pgtdbuser")),
                ("Password", black_box("pgtdbpass")),
                ("Capabilities", black_box("NOSUPERUSER NOCREATEDB NOCREATEROLE")),
                ("MigratorHash", black_box("0123456789abcdef0123456789abcdef")),
            ]);
            black_box(hash.finish())
        });
    });

    group.bench_function("migration_contents", |b| {
        b.iter(|| {
            let mut hash = RecursiveHash::new();
            for _ in 0..10 {
                hash.add(black_box(migration.as_bytes()));
            }
            black_box(hash.finish())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
