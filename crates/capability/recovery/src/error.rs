use prepay_filestore::FileStoreError;
use prepay_storage::StorageError;
use prepay_wal::WalError;
use uuid::Uuid;

/// 恢复流程错误。
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    FileStore(#[from] FileStoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("wal entry {0} not found")]
    EntryNotFound(Uuid),
    #[error("wal entry {0} is already {1}")]
    EntryNotPending(Uuid, &'static str),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
