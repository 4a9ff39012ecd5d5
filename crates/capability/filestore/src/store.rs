use crate::error::FileStoreError;
use crate::records::{FileDeductionRecord, FileReadingRecord};
use chrono::{Datelike, Days, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Readings,
    Deductions,
}

impl RecordKind {
    const ALL: [RecordKind; 2] = [RecordKind::Readings, RecordKind::Deductions];

    fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Readings => "readings",
            RecordKind::Deductions => "deductions",
        }
    }
}

/// 文件库统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStoreStats {
    pub reading_files: usize,
    pub deduction_files: usize,
    pub total_bytes: u64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
}

/// 按日期分区的 JSONL 备份库
pub struct FileStore {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let base = base.into();
        for kind in RecordKind::ALL {
            std::fs::create_dir_all(base.join(kind.dir_name()))?;
        }
        info!(target: "prepay.filestore", base = %base.display(), "file_store_opened");
        Ok(Self {
            base,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn save_reading(&self, record: &FileReadingRecord) -> Result<(), FileStoreError> {
        self.append(
            RecordKind::Readings,
            record.collect_time.date_naive(),
            record,
        )
    }

    pub fn save_deduction(&self, record: &FileDeductionRecord) -> Result<(), FileStoreError> {
        self.append(
            RecordKind::Deductions,
            record.deduction_time.date_naive(),
            record,
        )
    }

    /// 读取 [start, end] 日期内的读数备份；缺失的分区视为空
    pub fn read_readings(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FileReadingRecord>, FileStoreError> {
        self.read_range(RecordKind::Readings, start, end)
    }

    /// 读取 [start, end] 日期内的扣费备份；缺失的分区视为空
    pub fn read_deductions(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FileDeductionRecord>, FileStoreError> {
        self.read_range(RecordKind::Deductions, start, end)
    }

    /// 删除早于 `today - retention_days` 的分区文件，返回删除的文件数
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, FileStoreError> {
        let cutoff = retention_cutoff(Utc::now().date_naive(), retention_days);
        self.cleanup_before(cutoff)
    }

    /// 删除分区日期严格早于 `cutoff` 的文件，并清理留下的空目录
    pub fn cleanup_before(&self, cutoff: NaiveDate) -> Result<usize, FileStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| FileStoreError::LockPoisoned)?;
        let mut removed = 0;
        for kind in RecordKind::ALL {
            for (date, path) in self.partitions(kind)? {
                if date < cutoff {
                    std::fs::remove_file(&path)?;
                    removed += 1;
                    debug!(
                        target: "prepay.filestore",
                        path = %path.display(),
                        "partition_removed"
                    );
                    if let Some(day_dir) = path.parent() {
                        prune_empty_dirs(day_dir, &self.base.join(kind.dir_name()));
                    }
                }
            }
        }
        if removed > 0 {
            info!(
                target: "prepay.filestore",
                removed = removed,
                cutoff = %cutoff,
                "file_store_cleanup"
            );
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<FileStoreStats, FileStoreError> {
        let mut stats = FileStoreStats::default();
        for kind in RecordKind::ALL {
            for (date, path) in self.partitions(kind)? {
                match kind {
                    RecordKind::Readings => stats.reading_files += 1,
                    RecordKind::Deductions => stats.deduction_files += 1,
                }
                stats.total_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                stats.oldest_date = Some(stats.oldest_date.map_or(date, |d| d.min(date)));
                stats.newest_date = Some(stats.newest_date.map_or(date, |d| d.max(date)));
            }
        }
        Ok(stats)
    }

    fn partition_path(&self, kind: RecordKind, date: NaiveDate) -> PathBuf {
        let name = kind.dir_name();
        self.base
            .join(name)
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(format!("{name}_{}.jsonl", date.format("%Y%m%d")))
    }

    fn append<T: Serialize>(
        &self,
        kind: RecordKind,
        date: NaiveDate,
        record: &T,
    ) -> Result<(), FileStoreError> {
        let path = self.partition_path(kind, date);
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| FileStoreError::LockPoisoned)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;
        let torn = ends_with_partial_line(&mut file)?;
        let mut writer = BufWriter::new(file);
        if torn {
            // 上次写入中断留下半行：先换行，避免新记录与残片粘连
            warn!(target: "prepay.filestore", path = %path.display(), "partition_torn_tail");
            writer.write_all(b"\n")?;
        }
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    fn read_range<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<T>, FileStoreError> {
        if start > end {
            return Err(FileStoreError::InvalidRange(start, end));
        }
        // 只遍历实际存在的分区，开销与区间跨度无关
        let mut records = Vec::new();
        for (date, path) in self.partitions(kind)? {
            if date > end {
                break;
            }
            if date >= start {
                read_partition(&path, &mut records)?;
            }
        }
        Ok(records)
    }

    /// 列出某类记录的全部分区文件（按日期升序）
    fn partitions(&self, kind: RecordKind) -> Result<Vec<(NaiveDate, PathBuf)>, FileStoreError> {
        let root = self.base.join(kind.dir_name());
        let prefix = format!("{}_", kind.dir_name());
        let mut found = Vec::new();
        for year in sub_dirs(&root)? {
            for month in sub_dirs(&year)? {
                for day in sub_dirs(&month)? {
                    for entry in std::fs::read_dir(&day)? {
                        let path = entry?.path();
                        let Some(date) = path
                            .file_name()
                            .and_then(|name| name.to_str())
                            .and_then(|name| name.strip_prefix(prefix.as_str()))
                            .and_then(|rest| rest.strip_suffix(".jsonl"))
                            .and_then(|digits| NaiveDate::parse_from_str(digits, "%Y%m%d").ok())
                        else {
                            continue;
                        };
                        found.push((date, path));
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

/// 保留期超出日历范围时退化为最早日期，即不删除任何分区
fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// 非空文件且末字节不是换行
fn ends_with_partial_line(file: &mut File) -> Result<bool, FileStoreError> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn read_partition<T: DeserializeOwned>(
    path: &Path,
    out: &mut Vec<T>,
) -> Result<(), FileStoreError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(
                    target: "prepay.filestore",
                    path = %path.display(),
                    line = index + 1,
                    error = %err,
                    "partition_line_unreadable"
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => out.push(record),
            Err(err) => warn!(
                target: "prepay.filestore",
                path = %path.display(),
                line = index + 1,
                error = %err,
                "partition_line_malformed"
            ),
        }
    }
    Ok(())
}

fn sub_dirs(dir: &Path) -> Result<Vec<PathBuf>, FileStoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// 自下而上删除空目录，直到 `stop`（不含）
fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        // 非空目录删除失败即停止
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let path = store.partition_path(RecordKind::Deductions, date);
        assert_eq!(
            path.strip_prefix(dir.path()).unwrap(),
            Path::new("deductions/2024/03/09/deductions_20240309.jsonl")
        );
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            retention_cutoff(today, 30),
            NaiveDate::from_ymd_opt(2024, 2, 8).unwrap()
        );
        assert_eq!(retention_cutoff(today, u32::MAX), NaiveDate::MIN);
    }
}
