use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use codec::VarIntCodec;
use depcache::{InMemoryMultimaplet, Multimaplet, StorageManager, StringEnumerator};
use store::StoreConfig;

const KEYS: i32 = 200;
const VALUES: i32 = 20;

fn bench_config() -> StoreConfig {
    StoreConfig::default().with_sync_on_commit(false)
}

fn persistent_append(c: &mut Criterion) {
    c.bench_function("persistent_append_200x20", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let manager = StorageManager::new(dir.path(), bench_config());
                (dir, manager)
            },
            |(_dir, mut manager)| {
                let deps = manager
                    .open(false, |f| f.persistent_multimaplet::<VarIntCodec, VarIntCodec>("deps"))
                    .unwrap();
                for k in 0..KEYS {
                    for v in 0..VALUES {
                        deps.append_value(&k, v).unwrap();
                    }
                }
                manager.commit().unwrap();
                manager.close().unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn in_memory_append(c: &mut Criterion) {
    c.bench_function("in_memory_append_200x20", |b| {
        b.iter(|| {
            let deps = InMemoryMultimaplet::<i32, i32>::new();
            for k in 0..KEYS {
                for v in 0..VALUES {
                    deps.append_value(&k, v).unwrap();
                }
            }
        });
    });
}

fn enumerate_cached(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut manager = StorageManager::new(dir.path(), bench_config());
    manager.open(false, |_| Ok(())).unwrap();
    let names = manager.enumerator().unwrap();
    let words: Vec<String> = (0..1_000).map(|i| format!("com/example/Type{i}")).collect();
    for w in &words {
        names.enumerate(w).unwrap();
    }

    c.bench_function("enumerate_cached_1k", |b| {
        b.iter(|| {
            for w in &words {
                let _ = names.enumerate(w).unwrap();
            }
        });
    });
    manager.close().unwrap();
}

criterion_group!(benches, persistent_append, in_memory_append, enumerate_cached);
criterion_main!(benches);
