use chrono::{TimeZone, Utc};
use prepay_wal::{WalConfig, WalEntryType, WalStatus, WriteAheadLog};
use rust_decimal::Decimal;
use std::io::Write;
use tempfile::TempDir;

fn open(dir: &TempDir) -> WriteAheadLog {
    WriteAheadLog::open(WalConfig::new(dir.path())).expect("open wal")
}

fn ts(seconds: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

#[test]
fn pending_entry_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let wal = open(&dir);
        let entry = wal
            .write_reading(7, "collector-01:3", Decimal::new(10_250, 2), ts(0))
            .expect("write reading");
        assert_eq!(entry.status, WalStatus::Pending);
        entry.id
    };

    let wal = open(&dir);
    let pending = wal.pending_entries().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].entry_type, WalEntryType::Reading);
    let payload = pending[0].reading_payload().expect("reading payload");
    assert_eq!(payload.value, Decimal::new(10_250, 2));
    assert_eq!(payload.comm_addr, "collector-01:3");
}

#[test]
fn terminal_markers_fold_by_id() {
    let dir = TempDir::new().unwrap();
    let wal = open(&dir);
    let a = wal
        .write_reading(1, "a:1", Decimal::new(100, 0), ts(0))
        .unwrap();
    let b = wal
        .write_deduction(1, Decimal::new(250, 2), Decimal::new(150, 2))
        .unwrap();
    let c = wal
        .write_reading(2, "a:2", Decimal::new(200, 0), ts(1))
        .unwrap();

    wal.mark_completed(a.id).unwrap();
    wal.mark_failed(b.id, "reading too low").unwrap();

    let pending = wal.pending_entries().unwrap();
    assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), vec![c.id]);

    let all = wal.entries().unwrap();
    assert_eq!(all.len(), 3);
    let failed = all.iter().find(|e| e.id == b.id).unwrap();
    assert_eq!(failed.status, WalStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("reading too low"));
    assert!(failed.completed_at.is_some());
    assert_eq!(
        failed.deduction_payload().unwrap().amount,
        Decimal::new(150, 2)
    );
}

#[test]
fn pending_scan_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let wal = open(&dir);
    for i in 0..5 {
        wal.write_reading(i, "x:1", Decimal::from(i), ts(i)).unwrap();
    }
    let first = wal.pending_entries().unwrap();
    let second = wal.pending_entries().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

#[test]
fn segments_rotate_and_markers_cross_segments() {
    let dir = TempDir::new().unwrap();
    let wal = WriteAheadLog::open(WalConfig::new(dir.path()).with_segment_max_bytes(256))
        .expect("open wal");

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            wal.write_reading(i, "dev:1", Decimal::from(100 + i), ts(i))
                .unwrap()
                .id,
        );
    }
    let stats = wal.stats().unwrap();
    assert!(stats.segments > 1, "expected rotation, got {stats:?}");

    for id in &ids[..5] {
        wal.mark_completed(*id).unwrap();
    }
    let pending = wal.pending_entries().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[5]);
}

#[test]
fn torn_tail_line_is_skipped() {
    let dir = TempDir::new().unwrap();
    let wal = open(&dir);
    let entry = wal
        .write_reading(3, "dev:3", Decimal::new(5, 0), ts(0))
        .unwrap();
    drop(wal);

    let segment = dir.path().join("wal-00000001.log");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&segment)
        .unwrap();
    file.write_all(b"{\"id\":\"0190a0a0-").unwrap();
    drop(file);

    let wal = open(&dir);
    let pending = wal.pending_entries().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, entry.id);
}

#[test]
fn append_after_torn_tail_stays_readable() {
    let dir = TempDir::new().unwrap();
    let wal = open(&dir);
    let first = wal
        .write_reading(1, "dev:1", Decimal::new(10, 0), ts(0))
        .unwrap();
    drop(wal);

    let segment = dir.path().join("wal-00000001.log");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&segment)
        .unwrap();
    file.write_all(b"{\"id\":\"0190a0a0-").unwrap();
    drop(file);

    let wal = open(&dir);
    let second = wal
        .write_reading(2, "dev:2", Decimal::new(20, 0), ts(1))
        .unwrap();
    wal.mark_completed(first.id).unwrap();
    drop(wal);

    let wal = open(&dir);
    let entries = wal.entries().unwrap();
    let ids: Vec<_> = entries.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(entries[0].status, WalStatus::Completed);
    assert_eq!(entries[1].status, WalStatus::Pending);
    assert_eq!(entries[1].meter_id, 2);
}

#[test]
fn prune_carries_pending_entries_forward() {
    let dir = TempDir::new().unwrap();
    let wal = WriteAheadLog::open(WalConfig::new(dir.path()).with_segment_max_bytes(256))
        .expect("open wal");

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            wal.write_reading(i, "dev:1", Decimal::from(i), ts(i))
                .unwrap()
                .id,
        );
    }
    // 第二个条目保持 pending
    wal.mark_completed(ids[0]).unwrap();
    for id in &ids[2..] {
        wal.mark_completed(*id).unwrap();
    }
    let before = wal.stats().unwrap();
    assert!(before.segments > 1);

    let removed = wal.prune_resolved_segments().unwrap();
    assert_eq!(removed, before.segments - 1);
    assert_eq!(wal.stats().unwrap().segments, 1);

    let pending = wal.pending_entries().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[1]);
    assert_eq!(pending[0].meter_id, 1);

    // 转写后的条目仍可正常终结
    wal.mark_failed(ids[1], "resolved by operator").unwrap();
    drop(wal);
    let wal = WriteAheadLog::open(WalConfig::new(dir.path()).with_segment_max_bytes(256))
        .expect("reopen wal");
    assert!(wal.pending_entries().unwrap().is_empty());
    let carried = wal
        .entries()
        .unwrap()
        .into_iter()
        .find(|entry| entry.id == ids[1])
        .expect("carried entry");
    assert_eq!(carried.status, WalStatus::Failed);
}

#[test]
fn one_pending_deduction_does_not_block_pruning() {
    let dir = TempDir::new().unwrap();
    let wal = WriteAheadLog::open(WalConfig::new(dir.path()).with_segment_max_bytes(256))
        .expect("open wal");

    let orphan = wal
        .write_deduction(9, Decimal::new(250, 2), Decimal::new(150, 2))
        .unwrap();
    for i in 0..50 {
        let entry = wal
            .write_reading(i, "dev:1", Decimal::from(i), ts(i))
            .unwrap();
        wal.mark_completed(entry.id).unwrap();
    }
    assert!(wal.stats().unwrap().segments > 1);

    wal.prune_resolved_segments().unwrap();
    assert_eq!(wal.stats().unwrap().segments, 1);
    let pending = wal.pending_entries().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, orphan.id);
    assert_eq!(pending[0].entry_type, WalEntryType::Deduction);

    // 再次回收不会重复转写
    assert_eq!(wal.prune_resolved_segments().unwrap(), 0);
    assert_eq!(wal.pending_entries().unwrap().len(), 1);
}
