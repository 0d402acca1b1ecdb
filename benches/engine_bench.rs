use criterion::{criterion_group, criterion_main, Criterion};
use lumbung::engine::{Engine, EngineOptions};
use lumbung::ledger::SUPER_XID;
use tempfile::TempDir;

fn bench_insert(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::create(
        dir.path().join("bench"),
        EngineOptions { memory: 64 << 20 },
    )
    .unwrap();
    let payload = vec![0x5Au8; 128];

    c.bench_function("insert_128b", |b| {
        b.iter(|| engine.insert(SUPER_XID, &payload).unwrap())
    });

    engine.close().unwrap();
}

fn bench_read(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::create(
        dir.path().join("bench"),
        EngineOptions { memory: 64 << 20 },
    )
    .unwrap();
    let payload = vec![0xA5u8; 128];
    let uid = engine.insert(SUPER_XID, &payload).unwrap();

    c.bench_function("read_128b", |b| {
        b.iter(|| engine.read(SUPER_XID, uid).unwrap().unwrap())
    });

    engine.close().unwrap();
}

criterion_group!(benches, bench_insert, bench_read);
criterion_main!(benches);
