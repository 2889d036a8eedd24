mod common;

use std::fs::OpenOptions;

use anyhow::Result;
use depcache::{CacheError, LifecycleState, Multimaplet, StorageManager};
use store::{SNAPSHOT_FILE, WAL_FILE};
use tempfile::tempdir;

use common::{config, init_tracing, open_deps};

#[test]
fn truncated_snapshot_is_cleared_and_reopened_empty() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("cache");
    {
        let mut manager = StorageManager::new(&path, config());
        let deps = manager.open(false, open_deps)?;
        for k in 0..100 {
            deps.append_values(&k, vec![k, k + 1])?;
        }
        manager.close()?;
    }

    let snapshot = path.join(SNAPSHOT_FILE);
    let len = std::fs::metadata(&snapshot)?.len();
    OpenOptions::new().write(true).open(&snapshot)?.set_len(len / 2)?;

    let mut manager = StorageManager::new(&path, config());
    let deps = manager.open(false, open_deps)?;
    assert!(manager.was_cleared());
    assert_eq!(manager.state(), LifecycleState::Open);
    assert!(deps.keys()?.next().is_none());

    deps.append_value(&1, 1)?;
    manager.close()?;
    Ok(())
}

#[test]
fn corrupted_wal_is_cleared_and_reopened_empty() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    {
        let mut manager = StorageManager::new(dir.path(), config().with_compact_on_close(false));
        let deps = manager.open(false, open_deps)?;
        deps.append_value(&7, 7)?;
        manager.close()?;
    }

    let wal = dir.path().join(WAL_FILE);
    let mut bytes = std::fs::read(&wal)?;
    // inside the body of the first record, so its checksum no longer matches
    bytes[14] ^= 0xff;
    std::fs::write(&wal, bytes)?;

    let mut manager = StorageManager::new(dir.path(), config());
    let deps = manager.open(false, open_deps)?;
    assert!(manager.was_cleared());
    assert!(!deps.contains_key(&7)?);
    manager.close()?;
    Ok(())
}

#[test]
fn damaged_wal_length_triggers_a_rebuild_instead_of_truncation() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    {
        let mut manager = StorageManager::new(dir.path(), config().with_compact_on_close(false));
        let deps = manager.open(false, open_deps)?;
        deps.append_value(&7, 7)?;
        manager.commit()?;
        deps.append_value(&8, 8)?;
        manager.commit()?;
        manager.close()?;
    }

    let wal = dir.path().join(WAL_FILE);
    let mut bytes = std::fs::read(&wal)?;
    // the first frame now claims to run far past the end of the log
    bytes[2] = 0x10;
    std::fs::write(&wal, bytes)?;

    let mut manager = StorageManager::new(dir.path(), config().with_compact_on_close(false));
    let deps = manager.open(false, open_deps)?;
    assert!(manager.was_cleared());
    assert_eq!(manager.state(), LifecycleState::Open);
    assert!(!deps.contains_key(&7)?);
    assert!(!deps.contains_key(&8)?);

    // the rebuilt store journals fresh batches, not the damaged ones
    deps.append_value(&9, 9)?;
    manager.close()?;

    let deps = manager.open(false, open_deps)?;
    assert!(!manager.was_cleared());
    assert!(deps.contains_key(&9)?);
    manager.close()?;
    Ok(())
}

#[test]
fn permanent_failure_propagates_after_one_rebuild() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut manager = StorageManager::new(dir.path(), config());

    let mut attempts = 0;
    let err = manager
        .open(false, |factory| -> Result<(), CacheError> {
            attempts += 1;
            open_deps(factory)?;
            Err(CacheError::RebuildRequired {
                reason: "injected".into(),
            })
        })
        .unwrap_err();

    assert_eq!(attempts, 2);
    assert!(err.is_rebuild_required());
    assert!(manager.was_cleared());
    assert_eq!(manager.state(), LifecycleState::Failed);
    assert!(manager.factory().is_none());
    Ok(())
}

#[test]
fn forced_rebuild_uses_up_the_retry() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut manager = StorageManager::new(dir.path(), config());

    let mut attempts = 0;
    let result = manager.open(true, |_| -> Result<(), CacheError> {
        attempts += 1;
        Err(CacheError::RebuildRequired {
            reason: "injected".into(),
        })
    });

    assert!(result.is_err());
    assert_eq!(attempts, 1);
    Ok(())
}

#[test]
fn uncommitted_writes_do_not_survive_a_crash() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    {
        let mut manager = StorageManager::new(dir.path(), config());
        let deps = manager.open(false, open_deps)?;
        deps.append_value(&1, 1)?;
        manager.commit()?;
        deps.append_value(&2, 2)?;
        // simulate a crash: the store is dropped without flushing
        if let Some(factory) = manager.factory() {
            factory.store().close_immediately();
        }
    }

    let mut manager = StorageManager::new(dir.path(), config());
    let deps = manager.open(false, open_deps)?;
    assert!(!manager.was_cleared());
    assert!(deps.contains_key(&1)?);
    assert!(!deps.contains_key(&2)?);
    manager.close()?;
    Ok(())
}
