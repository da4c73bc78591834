//! In-process key-value boundary.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use super::{KvStore, PersistError, PersistResult};

/// Map-backed [`KvStore`]. Clones share the same storage, so a test or a
/// second session can inspect what the runtime wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().is_ok_and(|entries| entries.contains_key(key))
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |entries| entries.len())
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> PersistResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|err| PersistError::Message(format!("memory kv poisoned: {err}")))
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> PersistResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
