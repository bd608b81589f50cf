use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use trellis_storage::{FileStorage, MemoryStorage, StorageBackend, StorageKind};

use crate::config::StateConfig;
use crate::error::RuntimeError;
use crate::host::{Element, WeakElement};

/// Where a component's state is written after each mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMode {
    /// Serialized into an attribute on the component's own element.
    Inline { attribute: String },
    /// Serialized into a storage backend under `key`.
    Persisted { key: String, kind: StorageKind },
}

/// The storage backends persisted state can live in.
#[derive(Clone)]
pub struct StateBackends {
    pub session: Arc<dyn StorageBackend>,
    pub local: Arc<dyn StorageBackend>,
}

impl StateBackends {
    pub fn new(session: Arc<dyn StorageBackend>, local: Arc<dyn StorageBackend>) -> Self {
        Self { session, local }
    }

    /// Both kinds backed by separate in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(MemoryStorage::new()))
    }

    /// Session in memory, local in a file (`config.durable_path` or the
    /// default location).
    pub fn from_config(config: &StateConfig) -> Self {
        let path = config
            .durable_path
            .clone()
            .unwrap_or_else(FileStorage::default_path);
        Self::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(FileStorage::new(path)),
        )
    }

    pub fn for_kind(&self, kind: StorageKind) -> Arc<dyn StorageBackend> {
        match kind {
            StorageKind::Session => self.session.clone(),
            StorageKind::Local => self.local.clone(),
        }
    }
}

struct StateInner {
    element: WeakElement,
    mode: StateMode,
    backend: Option<Arc<dyn StorageBackend>>,
    values: Map<String, Value>,
}

/// Flat key/value state for one component.
///
/// The mode is decided once in [`init`](Self::init) from the element's
/// attributes and never changes. Every mutation is followed by an explicit
/// write of the whole map to the mode's backing place.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct StateManager {
    inner: Rc<RefCell<StateInner>>,
}

impl StateManager {
    /// Bind state to `element`, loading whatever is already stored.
    ///
    /// Unreadable stored state is logged and replaced by an empty map.
    pub fn init(element: &Element, config: &StateConfig, backends: &StateBackends) -> Self {
        let (mode, backend, stored) = match element.attribute(&config.key_attribute) {
            Some(key) => {
                let kind = match element.attribute(&config.kind_attribute) {
                    Some(raw) => raw.parse::<StorageKind>().unwrap_or_else(|e| {
                        tracing::warn!(tag = %element.tag(), kind = %raw, "{e}; using local storage");
                        StorageKind::Local
                    }),
                    None => StorageKind::default(),
                };
                let backend = backends.for_kind(kind);
                let stored = match backend.get_item(&key) {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!(key = %key, backend = backend.backend_name(), error = %e, "Failed to read persisted state");
                        None
                    }
                };
                (StateMode::Persisted { key, kind }, Some(backend), stored)
            }
            None => {
                let stored = element.attribute(&config.attribute);
                (
                    StateMode::Inline {
                        attribute: config.attribute.clone(),
                    },
                    None,
                    stored,
                )
            }
        };

        let values = stored
            .map(|raw| parse_state(&raw, element))
            .unwrap_or_default();

        tracing::debug!(tag = %element.tag(), mode = ?mode, keys = values.len(), "State initialized");

        Self {
            inner: Rc::new(RefCell::new(StateInner {
                element: element.downgrade(),
                mode,
                backend,
                values,
            })),
        }
    }

    pub fn mode(&self) -> StateMode {
        self.inner.borrow().mode.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.borrow().values.get(key).cloned()
    }

    /// Typed read. `None` if absent or not deserializable as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.borrow().values.contains_key(key)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.borrow().values.clone()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), RuntimeError> {
        self.inner
            .borrow_mut()
            .values
            .insert(key.to_string(), value.into());
        self.persist()
    }

    /// Apply several writes, persisting once.
    pub fn set_many<I, K>(&self, entries: I) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        {
            let mut inner = self.inner.borrow_mut();
            for (key, value) in entries {
                inner.values.insert(key.into(), value);
            }
        }
        self.persist()
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, RuntimeError> {
        let removed = self.inner.borrow_mut().values.remove(key);
        self.persist()?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), RuntimeError> {
        self.inner.borrow_mut().values.clear();
        self.persist()
    }

    fn persist(&self) -> Result<(), RuntimeError> {
        let inner = self.inner.borrow();
        let serialized = serde_json::to_string(&inner.values)?;
        match (&inner.mode, &inner.backend) {
            (StateMode::Persisted { key, .. }, Some(backend)) => {
                backend.set_item(key, &serialized)?;
            }
            (StateMode::Inline { attribute }, _) => match inner.element.upgrade() {
                Some(element) => element.set_attribute(attribute, serialized),
                None => tracing::debug!(attribute = %attribute, "Element is gone; inline state not written"),
            },
            (StateMode::Persisted { key, .. }, None) => {
                tracing::warn!(key = %key, "Persisted state has no backend; dropping write");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("StateManager")
            .field("mode", &inner.mode)
            .field("values", &inner.values)
            .finish()
    }
}

fn parse_state(raw: &str, element: &Element) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(tag = %element.tag(), found = %other, "Stored state is not a JSON object; starting empty");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(tag = %element.tag(), error = %e, "Stored state is not valid JSON; starting empty");
            Map::new()
        }
    }
}
