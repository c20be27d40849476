//! Crash-recovery and checkpoint scenarios
//!
//! A process kill is simulated by copying the store directory while the
//! store is still open (so nothing sees a clean close) and reopening the
//! copy. Corruption scenarios damage `wal.log` directly.

use std::fs;
use std::path::Path;
use tempfile::tempdir;
use tessera::{Error, Pattern, QuadStore, StoreConfig};

const WAL_RECORD_LEN: usize = 72;

fn open(dir: &Path) -> QuadStore {
    QuadStore::open(dir, StoreConfig::for_testing()).unwrap()
}

/// Snapshot the store's files as they are right now, mid-life
fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), to.join(entry.file_name())).unwrap();
    }
}

fn current_subjects(store: &QuadStore) -> Vec<String> {
    let mut subjects: Vec<String> = store
        .query_current(Pattern::ANY)
        .unwrap()
        .map(|r| r.unwrap().subject)
        .collect();
    subjects.sort();
    subjects
}

#[test]
fn test_committed_quads_survive_simulated_kill() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");
    let killed = root.path().join("killed");

    let store = open(&live);
    for i in 0..25 {
        store
            .add_current(None, &format!("<s{i}>"), "<p>", "\"v\"")
            .unwrap();
    }

    // Kill: copy the directory out from under the open store
    copy_dir(&live, &killed);
    drop(store);

    let recovered = open(&killed);
    assert!(!recovered.is_read_only());
    assert_eq!(current_subjects(&recovered).len(), 25);
}

#[test]
fn scenario_uncommitted_batch_is_lost() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");
    let killed = root.path().join("killed");

    let store = open(&live);
    store.add_current(None, "<before>", "<p>", "\"v\"").unwrap();

    // An open batch buffers in memory; the kill happens before commit
    store.begin_batch().unwrap();
    for i in 0..1000 {
        store
            .add_batched(None, &format!("<batched{i}>"), "<p>", "\"v\"")
            .unwrap();
    }
    copy_dir(&live, &killed);
    drop(store);

    let recovered = open(&killed);
    assert_eq!(current_subjects(&recovered), vec!["<before>"]);
}

#[test]
fn test_checkpoint_recovery_equivalence() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");

    let store = open(&live);
    for i in 0..30 {
        store
            .add_current(None, &format!("<s{i}>"), "<p>", "\"v\"")
            .unwrap();
    }
    let expected = current_subjects(&store);

    // Recovery from the states after one and after two checkpoints must
    // agree; the second checkpoint is durably a no-op
    store.checkpoint().unwrap();
    let once = root.path().join("after-one");
    copy_dir(&live, &once);

    store.checkpoint().unwrap();
    let twice = root.path().join("after-two");
    copy_dir(&live, &twice);
    drop(store);

    let from_once = open(&once);
    let from_twice = open(&twice);
    assert_eq!(current_subjects(&from_once), expected);
    assert_eq!(current_subjects(&from_twice), expected);

    let stats_once = from_once.statistics().unwrap();
    let stats_twice = from_twice.statistics().unwrap();
    assert_eq!(stats_once.quad_count, stats_twice.quad_count);
    assert_eq!(stats_once.wal_checkpoint_tx_id, stats_twice.wal_checkpoint_tx_id);
}

#[test]
fn test_checkpoint_survives_kill_after_wal_truncation() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");
    let killed = root.path().join("killed");

    let store = open(&live);
    for i in 0..20 {
        store
            .add_current(None, &format!("<s{i}>"), "<p>", "\"v\"")
            .unwrap();
    }
    store.checkpoint().unwrap();

    // Post-checkpoint writes live only in the WAL tail
    store.add_current(None, "<tail>", "<p>", "\"v\"").unwrap();
    copy_dir(&live, &killed);
    drop(store);

    let recovered = open(&killed);
    let subjects = current_subjects(&recovered);
    assert_eq!(subjects.len(), 21);
    assert!(subjects.contains(&"<tail>".to_string()));
}

#[test]
fn test_damaged_tail_recovers_writable() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");

    {
        let store = open(&live);
        store.add_current(None, "<a>", "<p>", "\"v\"").unwrap();
        store.add_current(None, "<b>", "<p>", "\"v\"").unwrap();
    }

    // A partial append at the tail: the shape of a crash mid-write
    let wal = live.join("wal.log");
    let mut bytes = fs::read(&wal).unwrap();
    bytes.extend_from_slice(&[0x5A; 31]);
    fs::write(&wal, bytes).unwrap();

    let store = open(&live);
    assert!(!store.is_read_only());
    assert_eq!(current_subjects(&store).len(), 2);
    // Still writable after tail truncation
    store.add_current(None, "<c>", "<p>", "\"v\"").unwrap();
    assert_eq!(current_subjects(&store).len(), 3);
    drop(store);

    // The damaged tail was cut off, so the post-recovery write is itself
    // recoverable
    let reopened = open(&live);
    assert_eq!(current_subjects(&reopened).len(), 3);
}

#[test]
fn test_mid_log_damage_opens_read_only() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");

    {
        let store = open(&live);
        for i in 0..5 {
            store
                .add_current(None, &format!("<s{i}>"), "<p>", "\"v\"")
                .unwrap();
        }
    }

    // Flip a byte in the middle of the log, leaving valid records after it
    let wal = live.join("wal.log");
    let mut bytes = fs::read(&wal).unwrap();
    assert!(bytes.len() > 4 * WAL_RECORD_LEN);
    bytes[2 * WAL_RECORD_LEN + 10] ^= 0xFF;
    fs::write(&wal, bytes).unwrap();

    let store = open(&live);
    assert!(store.is_read_only());

    // Reads still work; every write surfaces ReadOnly
    let _ = current_subjects(&store);
    assert!(matches!(
        store.add_current(None, "<x>", "<p>", "\"v\""),
        Err(Error::ReadOnly(_))
    ));
    assert!(matches!(store.begin_batch(), Err(Error::ReadOnly(_))));
    assert!(matches!(store.checkpoint(), Err(Error::ReadOnly(_))));
}

#[test]
fn test_wal_replay_is_idempotent_across_reopens() {
    let root = tempdir().unwrap();
    let live = root.path().join("live");

    {
        let store = open(&live);
        for i in 0..10 {
            store
                .add_current(None, &format!("<s{i}>"), "<p>", "\"v\"")
                .unwrap();
        }
    }

    // Each reopen replays the same WAL tail into already-updated indexes
    for _ in 0..3 {
        let store = open(&live);
        assert_eq!(current_subjects(&store).len(), 10);
        let stats = store.statistics().unwrap();
        assert_eq!(stats.version_count, 10);
    }
}
