pub mod error;
pub mod file;
pub mod store;

pub use error::StorageError;
pub use file::FileStorage;
pub use store::{MemoryStorage, StorageBackend, StorageKind};
