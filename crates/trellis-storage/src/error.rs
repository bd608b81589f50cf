use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown storage kind: {0}")]
    UnknownKind(String),

    #[error("storage file is corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
