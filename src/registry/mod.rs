use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Error returned by registry create operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("entry already exists for ID '{0}'")]
    Duplicate(String),
}

/// Process-wide mapping from string id to a live activity object.
///
/// Control-plane handlers mutate the map while status handlers and running
/// activities read it. Insertion happens under the map's shard lock, so two
/// concurrent creates against the same id cannot both succeed.
pub struct Registry<T> {
    entries: DashMap<String, Arc<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Inserts a new entry, failing without mutation if the id is taken.
    pub fn insert(&self, id: &str, value: Arc<T>) -> Result<(), RegistryError> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.entries.remove(id).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits every entry. Entries inserted or removed concurrently may or
    /// may not be observed.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Arc<T>)) {
        for entry in self.entries.iter() {
            f(entry.key(), entry.value());
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
