use std::collections::HashMap;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Which backing store a persisted component uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Lives as long as the running application.
    Session,
    /// Survives restarts.
    #[default]
    Local,
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(StorageKind::Session),
            "local" | "durable" => Ok(StorageKind::Local),
            other => Err(StorageError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Session => write!(f, "session"),
            StorageKind::Local => write!(f, "local"),
        }
    }
}

/// A string key-value store, the shape of a browser `Storage` object.
///
/// Values are opaque strings; callers serialize JSON into them.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Stored keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &str;
}

/// In-process store. Used as the session-scoped backend and in tests.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a store with known items.
    pub fn with_items(items: HashMap<String, String>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.items.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStorage::new();
        assert!(store.get_item("cart").unwrap().is_none());

        store.set_item("cart", r#"{"count":1}"#).unwrap();
        assert_eq!(store.get_item("cart").unwrap().as_deref(), Some(r#"{"count":1}"#));

        store.remove_item("cart").unwrap();
        assert!(store.get_item("cart").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_lists_sorted_keys() {
        let mut items = HashMap::new();
        items.insert("beta".into(), "2".into());
        items.insert("alpha".into(), "1".into());

        let store = MemoryStorage::with_items(items);
        assert_eq!(store.keys().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn parses_storage_kinds() {
        assert_eq!("session".parse::<StorageKind>().unwrap(), StorageKind::Session);
        assert_eq!("Local".parse::<StorageKind>().unwrap(), StorageKind::Local);
        assert_eq!("durable".parse::<StorageKind>().unwrap(), StorageKind::Local);
        assert!(matches!(
            "cookie".parse::<StorageKind>(),
            Err(StorageError::UnknownKind(_))
        ));
    }

    #[test]
    fn backend_name() {
        assert_eq!(MemoryStorage::new().backend_name(), "memory");
    }
}
