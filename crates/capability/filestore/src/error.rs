/// 文件库错误。
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file store encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("file store lock poisoned")]
    LockPoisoned,
    #[error("invalid date range: {0} > {1}")]
    InvalidRange(chrono::NaiveDate, chrono::NaiveDate),
}
