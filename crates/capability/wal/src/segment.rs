//! 分段文件命名与逐行读取

use crate::entry::WalLine;
use crate::error::WalError;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";
const TAIL_SCAN_CHUNK: u64 = 4096;

pub(crate) fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{seq:08}{SEGMENT_SUFFIX}"))
}

fn parse_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// 目录下所有分段，按序号升序
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for item in std::fs::read_dir(dir)? {
        let path = item?.path();
        if let Some(seq) = parse_seq(&path) {
            segments.push((seq, path));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// 读取分段中的所有有效行
///
/// 崩溃可能留下半行，解析失败的行记录告警后跳过。
pub(crate) fn read_segment(path: &Path) -> Result<Vec<WalLine>, WalError> {
    let file = match File::open(path) {
        Ok(file) => file,
        // 读取期间被清理
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(
                    target: "prepay.wal",
                    segment = %path.display(),
                    line = index + 1,
                    error = %err,
                    "wal_line_unreadable"
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalLine>(&line) {
            Ok(parsed) => lines.push(parsed),
            Err(err) => warn!(
                target: "prepay.wal",
                segment = %path.display(),
                line = index + 1,
                error = %err,
                "wal_line_malformed"
            ),
        }
    }
    Ok(lines)
}

/// 截掉崩溃留下的未完成末行，返回截断后的长度
///
/// 未以换行结尾的末行从未 fsync 成功，不会被确认；保留它会与下一次追加粘成一行。
pub(crate) fn truncate_torn_tail(path: &Path) -> Result<u64, WalError> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let len = file.metadata()?.len();
    let keep = complete_prefix_len(&mut file, len)?;
    if keep < len {
        file.set_len(keep)?;
        file.sync_all()?;
        warn!(
            target: "prepay.wal",
            segment = %path.display(),
            dropped_bytes = len - keep,
            "wal_torn_tail_truncated"
        );
    }
    Ok(keep)
}

/// 最后一个换行符之后的位置；没有换行时为 0
fn complete_prefix_len(file: &mut File, len: u64) -> Result<u64, WalError> {
    let mut end = len;
    let mut buf = vec![0u8; TAIL_SCAN_CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(TAIL_SCAN_CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|byte| *byte == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}
