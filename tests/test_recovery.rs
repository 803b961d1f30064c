mod common;

use arcstore::transaction::LogRecord;
use arcstore::{BlockId, Database, Error, Transaction};
use tempfile::tempdir;

/// Simulate a crash: active transactions neither commit nor roll back, and
/// nothing still in memory is written out.
fn crash(db: Database, active: Vec<Transaction>) {
    for tx in active {
        std::mem::forget(tx);
    }
    drop(db);
}

#[test]
fn test_committed_changes_survive_restart() {
    let dir = tempdir().unwrap();
    let block = BlockId::new("t.tbl", 0);
    {
        let db = common::open(dir.path());
        let mut tx = db.begin().unwrap();
        tx.set_int(&block, 80, 1).unwrap();
        tx.set_string(&block, 100, "durable").unwrap();
        tx.commit().unwrap();
        crash(db, vec![]);
    }

    let db = common::open(dir.path());
    assert!(!db.is_new());
    let mut tx = db.begin().unwrap();
    assert_eq!(tx.get_int(&block, 80).unwrap(), 1);
    assert_eq!(tx.get_string(&block, 100).unwrap(), "durable");
    tx.commit().unwrap();
}

#[test]
fn test_uncommitted_changes_on_disk_are_undone() {
    let dir = tempdir().unwrap();
    let block = BlockId::new("t.tbl", 0);
    {
        let db = common::open(dir.path());
        let mut setup = db.begin().unwrap();
        setup.set_int(&block, 80, 1).unwrap();
        setup.set_string(&block, 100, "committed").unwrap();
        setup.commit().unwrap();

        let mut tx = db.begin().unwrap();
        tx.set_int(&block, 80, 9).unwrap();
        tx.set_string(&block, 100, "uncommitted").unwrap();
        // The dirty page reaches disk ahead of any COMMIT, as an eviction would
        db.buffer_pool().flush_all(tx.id()).unwrap();
        crash(db, vec![tx]);
    }

    let db = common::open(dir.path());
    let mut tx = db.begin().unwrap();
    assert_eq!(tx.get_int(&block, 80).unwrap(), 1);
    assert_eq!(tx.get_string(&block, 100).unwrap(), "committed");
    tx.commit().unwrap();
}

#[test]
fn test_uncommitted_changes_in_memory_are_lost() {
    let dir = tempdir().unwrap();
    let block = BlockId::new("t.tbl", 0);
    {
        let db = common::open(dir.path());
        let mut tx = db.begin().unwrap();
        tx.set_int(&block, 80, 9).unwrap();
        crash(db, vec![tx]);
    }

    let db = common::open(dir.path());
    let mut tx = db.begin().unwrap();
    assert_eq!(tx.get_int(&block, 80).unwrap(), 0);
    tx.commit().unwrap();
}

#[test]
fn test_interleaved_transactions_recover_independently() {
    let dir = tempdir().unwrap();
    let b0 = BlockId::new("t.tbl", 0);
    let b1 = BlockId::new("t.tbl", 1);
    let b2 = BlockId::new("t.tbl", 2);
    {
        let db = common::open(dir.path());
        let mut winner = db.begin().unwrap();
        let mut loser = db.begin().unwrap();
        let mut aborted = db.begin().unwrap();

        winner.set_int(&b0, 0, 10).unwrap();
        loser.set_int(&b1, 0, 20).unwrap();
        aborted.set_int(&b2, 100, 30).unwrap();
        winner.set_int(&b0, 4, 11).unwrap();
        loser.set_int(&b1, 4, 21).unwrap();

        aborted.rollback().unwrap();
        db.buffer_pool().flush_all(loser.id()).unwrap();
        winner.commit().unwrap();
        crash(db, vec![loser]);
    }

    let db = common::open(dir.path());
    let mut tx = db.begin().unwrap();
    assert_eq!(tx.get_int(&b0, 0).unwrap(), 10);
    assert_eq!(tx.get_int(&b0, 4).unwrap(), 11);
    assert_eq!(tx.get_int(&b1, 0).unwrap(), 0);
    assert_eq!(tx.get_int(&b1, 4).unwrap(), 0);
    assert_eq!(tx.get_int(&b2, 100).unwrap(), 0);
    tx.commit().unwrap();
}

#[test]
fn test_recovery_writes_checkpoint() {
    let dir = tempdir().unwrap();
    let db = common::open(dir.path());

    let newest: Vec<LogRecord> = db
        .log()
        .iterator()
        .unwrap()
        .take(2)
        .map(|item| LogRecord::from_bytes(&item.unwrap().1).unwrap())
        .collect();
    assert!(matches!(newest[0], LogRecord::Commit { .. }));
    assert_eq!(newest[1], LogRecord::Checkpoint);
}

#[test]
fn test_recovery_stops_at_checkpoint() {
    let dir = tempdir().unwrap();
    let block = BlockId::new("t.tbl", 0);
    {
        let db = common::open(dir.path());
        let mut tx = db.begin().unwrap();
        tx.set_int(&block, 0, 5).unwrap();
        tx.commit().unwrap();
        crash(db, vec![]);
    }
    {
        // Every restart adds a checkpoint
        let db = common::open(dir.path());
        crash(db, vec![]);
    }

    let db = common::open(dir.path());
    let checkpoints = db
        .log()
        .iterator()
        .unwrap()
        .map(|item| LogRecord::from_bytes(&item.unwrap().1).unwrap())
        .filter(|record| *record == LogRecord::Checkpoint)
        .count();
    assert_eq!(checkpoints, 3);

    let mut tx = db.begin().unwrap();
    assert_eq!(tx.get_int(&block, 0).unwrap(), 5);
    tx.commit().unwrap();
}

#[test]
fn test_corrupt_log_record_fails_recovery() {
    let dir = tempdir().unwrap();
    {
        let db = common::open(dir.path());
        let lsn = db.log().append(&[0xEE, 0x01]).unwrap();
        db.log().flush(lsn).unwrap();
        crash(db, vec![]);
    }

    let err = Database::open_and_recover(common::config(dir.path())).unwrap_err();
    assert!(matches!(err, Error::CorruptLogRecord(_)));
}

#[test]
fn test_restart_after_crash_while_extending_log() {
    let dir = tempdir().unwrap();
    let block = BlockId::new("t.tbl", 0);
    {
        let db = common::open(dir.path());
        let mut tx = db.begin().unwrap();
        tx.set_int(&block, 0, 42).unwrap();
        tx.commit().unwrap();
        // A new log block reached disk before its header did
        let log_file = db.config().log_file.clone();
        db.disk().append(&log_file).unwrap();
        crash(db, vec![]);
    }

    let db = common::open(dir.path());
    let mut tx = db.begin().unwrap();
    assert_eq!(tx.get_int(&block, 0).unwrap(), 42);
    tx.commit().unwrap();
}
