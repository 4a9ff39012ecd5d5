/// WAL 错误。
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("wal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("wal writer lock poisoned")]
    LockPoisoned,
}
