//! 分段追加写入与折叠读取

use crate::entry::{
    DeductionPayload, ReadingPayload, WalEntry, WalEntryType, WalLine, WalMarker, WalStatus,
};
use crate::error::WalError;
use crate::segment::{list_segments, read_segment, segment_path, truncate_torn_tail};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// 默认分段上限：64 MiB
const DEFAULT_SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// WAL 配置
#[derive(Debug, Clone)]
pub struct WalConfig {
    pub dir: PathBuf,
    pub segment_max_bytes: u64,
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
        }
    }

    pub fn with_segment_max_bytes(mut self, bytes: u64) -> Self {
        self.segment_max_bytes = bytes.max(1);
        self
    }
}

/// WAL 运行快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalStats {
    pub segments: usize,
    pub active_segment: u64,
    pub bytes: u64,
}

struct ActiveSegment {
    seq: u64,
    file: File,
    bytes: u64,
}

/// 预写日志
pub struct WriteAheadLog {
    config: WalConfig,
    active: Mutex<ActiveSegment>,
}

impl WriteAheadLog {
    /// 打开（或创建）WAL 目录，续写最新分段
    pub fn open(config: WalConfig) -> Result<Self, WalError> {
        std::fs::create_dir_all(&config.dir)?;
        let seq = list_segments(&config.dir)?
            .last()
            .map(|(seq, _)| *seq)
            .unwrap_or(1);
        let (file, bytes) = open_segment(&config, seq)?;
        info!(
            target: "prepay.wal",
            dir = %config.dir.display(),
            segment = seq,
            bytes = bytes,
            "wal_opened"
        );
        Ok(Self {
            config,
            active: Mutex::new(ActiveSegment { seq, file, bytes }),
        })
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// 记录即将处理的读数
    pub fn write_reading(
        &self,
        meter_id: i64,
        comm_addr: &str,
        value: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<WalEntry, WalError> {
        let payload = serde_json::to_value(ReadingPayload {
            comm_addr: comm_addr.to_string(),
            value,
            timestamp,
        })?;
        self.append_entry(WalEntryType::Reading, meter_id, payload, timestamp)
    }

    /// 记录即将执行的扣费
    pub fn write_deduction(
        &self,
        meter_id: i64,
        consumption: Decimal,
        amount: Decimal,
    ) -> Result<WalEntry, WalError> {
        let payload = serde_json::to_value(DeductionPayload {
            consumption,
            amount,
        })?;
        self.append_entry(WalEntryType::Deduction, meter_id, payload, Utc::now())
    }

    /// 追加 completed 标记
    pub fn mark_completed(&self, id: Uuid) -> Result<(), WalError> {
        self.append_marker(WalMarker {
            id,
            status: WalStatus::Completed,
            completed_at: Utc::now(),
            error: None,
        })
    }

    /// 追加 failed 标记
    pub fn mark_failed(&self, id: Uuid, reason: impl Into<String>) -> Result<(), WalError> {
        self.append_marker(WalMarker {
            id,
            status: WalStatus::Failed,
            completed_at: Utc::now(),
            error: Some(reason.into()),
        })
    }

    /// 重放所有分段并折叠终态标记
    pub fn entries(&self) -> Result<Vec<WalEntry>, WalError> {
        let mut folded = Folded::default();
        for (_, path) in list_segments(&self.config.dir)? {
            for line in read_segment(&path)? {
                folded.apply(line);
            }
        }
        Ok(folded.entries)
    }

    /// 仍处于 pending 的条目（按写入顺序）
    pub fn pending_entries(&self) -> Result<Vec<WalEntry>, WalError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.status == WalStatus::Pending)
            .collect())
    }

    /// 回收活动分段之前的全部分段，返回删除的分段数
    ///
    /// 仍为 pending 的条目先原样转写到活动分段并 fsync，再删除旧分段；整个过程持有写锁，
    /// 期间追加的终态标记不会落在转写行之前。活动分段中已有同 id 的行时不重复转写。
    pub fn prune_resolved_segments(&self) -> Result<usize, WalError> {
        let mut active = self.active.lock().map_err(|_| WalError::LockPoisoned)?;
        let segments = list_segments(&self.config.dir)?;

        let mut folded = Folded::default();
        let mut active_ids = HashSet::new();
        let mut old_ids = HashSet::new();
        let mut old_paths = Vec::new();
        for (seq, path) in &segments {
            let is_active = *seq == active.seq;
            for line in read_segment(path)? {
                if let WalLine::Entry(entry) = &line {
                    if is_active {
                        active_ids.insert(entry.id);
                    } else {
                        old_ids.insert(entry.id);
                    }
                }
                folded.apply(line);
            }
            if *seq < active.seq {
                old_paths.push((*seq, path.clone()));
            }
        }
        if old_paths.is_empty() {
            return Ok(0);
        }

        let mut carried = 0;
        for entry in &folded.entries {
            if entry.status == WalStatus::Pending
                && old_ids.contains(&entry.id)
                && !active_ids.contains(&entry.id)
            {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                active.file.write_all(&line)?;
                active.bytes += line.len() as u64;
                carried += 1;
            }
        }
        if carried > 0 {
            active.file.sync_data()?;
        }

        let mut removed = 0;
        for (seq, path) in old_paths {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
            removed += 1;
            debug!(target: "prepay.wal", segment = seq, "wal_segment_pruned");
        }
        info!(
            target: "prepay.wal",
            removed = removed,
            carried = carried,
            active_segment = active.seq,
            "wal_pruned"
        );
        Ok(removed)
    }

    pub fn stats(&self) -> Result<WalStats, WalError> {
        let active_segment = self.active_seq()?;
        let segments = list_segments(&self.config.dir)?;
        let mut bytes = 0;
        for (_, path) in &segments {
            bytes += std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        }
        Ok(WalStats {
            segments: segments.len(),
            active_segment,
            bytes,
        })
    }

    fn active_seq(&self) -> Result<u64, WalError> {
        let active = self.active.lock().map_err(|_| WalError::LockPoisoned)?;
        Ok(active.seq)
    }

    fn append_entry(
        &self,
        entry_type: WalEntryType,
        meter_id: i64,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<WalEntry, WalError> {
        let entry = WalEntry {
            id: Uuid::now_v7(),
            entry_type,
            status: WalStatus::Pending,
            meter_id,
            payload,
            timestamp,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        self.append_line(serde_json::to_vec(&entry)?)?;
        Ok(entry)
    }

    fn append_marker(&self, marker: WalMarker) -> Result<(), WalError> {
        self.append_line(serde_json::to_vec(&marker)?)
    }

    /// 追加一行并 fsync；当前分段写满时先轮转
    fn append_line(&self, mut line: Vec<u8>) -> Result<(), WalError> {
        line.push(b'\n');
        let len = line.len() as u64;

        let mut active = self.active.lock().map_err(|_| WalError::LockPoisoned)?;
        if active.bytes > 0 && active.bytes + len > self.config.segment_max_bytes {
            active.file.sync_all()?;
            let next = active.seq + 1;
            let (file, bytes) = open_segment(&self.config, next)?;
            debug!(
                target: "prepay.wal",
                from = active.seq,
                to = next,
                "wal_segment_rotated"
            );
            *active = ActiveSegment {
                seq: next,
                file,
                bytes,
            };
        }
        active.file.write_all(&line)?;
        active.file.sync_data()?;
        active.bytes += len;
        Ok(())
    }
}

fn open_segment(config: &WalConfig, seq: u64) -> Result<(File, u64), WalError> {
    let path = segment_path(&config.dir, seq);
    truncate_torn_tail(&path)?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let bytes = file.metadata()?.len();
    Ok((file, bytes))
}

#[derive(Default)]
struct Folded {
    entries: Vec<WalEntry>,
    index: HashMap<Uuid, usize>,
}

impl Folded {
    fn apply(&mut self, line: WalLine) {
        match line {
            WalLine::Entry(entry) => {
                if let Some(position) = self.index.get(&entry.id) {
                    // 重复的原始行：保留首次出现的条目
                    debug!(target: "prepay.wal", id = %entry.id, position = *position, "wal_duplicate_entry");
                    return;
                }
                self.index.insert(entry.id, self.entries.len());
                self.entries.push(entry);
            }
            WalLine::Marker(marker) => match self.index.get(&marker.id) {
                Some(position) => {
                    let entry = &mut self.entries[*position];
                    entry.status = marker.status;
                    entry.completed_at = Some(marker.completed_at);
                    entry.error = marker.error;
                }
                None => {
                    debug!(target: "prepay.wal", id = %marker.id, "wal_orphan_marker");
                }
            },
        }
    }
}
