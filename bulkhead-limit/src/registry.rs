use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use tracing::info;

use crate::Bulkhead;
use crate::BulkheadConfig;
use crate::BulkheadMetrics;
use crate::ConfigError;

/// A lookup for a bulkhead name that was never registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no bulkhead registered as `{0}`")]
pub struct NotFoundError(pub String);

/// Owns the named bulkheads of a process.
///
/// Each bulkhead is configured independently and never shares permits with
/// another. Configuration is fixed per bulkhead; [`Registry::replace`] swaps
/// in a freshly built one rather than mutating the old in place.
#[derive(Debug, Default)]
pub struct Registry {
    bulkheads: RwLock<HashMap<String, Bulkhead>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new bulkhead under `name`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateName` if `name` is taken. The existing
    /// bulkhead is left untouched.
    pub fn create(
        &self,
        name: impl Into<String>,
        config: BulkheadConfig,
    ) -> Result<Bulkhead, ConfigError> {
        let name = name.into();
        let mut bulkheads = self.write();
        match bulkheads.entry(name) {
            Entry::Occupied(entry) => Err(ConfigError::DuplicateName(entry.key().clone())),
            Entry::Vacant(entry) => {
                let bulkhead = Bulkhead::new(entry.key().clone(), config);
                info!(
                    bulkhead = %entry.key(),
                    max_concurrent_calls = config.max_concurrent_calls().get(),
                    max_wait_ms = config.max_wait_duration().as_millis() as u64,
                    "bulkhead registered"
                );
                Ok(entry.insert(bulkhead).clone())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Bulkhead, NotFoundError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| NotFoundError(name.to_string()))
    }

    /// Swap the bulkhead registered as `name` for one built from `config`.
    ///
    /// Callers already holding a permit from the old bulkhead keep it and
    /// release it back to the old one; new lookups see the new bulkhead.
    pub fn replace(&self, name: &str, config: BulkheadConfig) -> Result<Bulkhead, NotFoundError> {
        let mut bulkheads = self.write();
        let slot = bulkheads
            .get_mut(name)
            .ok_or_else(|| NotFoundError(name.to_string()))?;
        let previous = std::mem::replace(slot, Bulkhead::new(name, config));
        info!(
            bulkhead = name,
            max_concurrent_calls = config.max_concurrent_calls().get(),
            max_wait_ms = config.max_wait_duration().as_millis() as u64,
            previous_max_concurrent_calls = previous.config().max_concurrent_calls().get(),
            "bulkhead replaced"
        );
        Ok(slot.clone())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn metrics(&self) -> BTreeMap<String, BulkheadMetrics> {
        self.read()
            .iter()
            .map(|(name, bulkhead)| (name.clone(), bulkhead.metrics()))
            .collect()
    }

    // The map is only ever touched by single insert/replace calls, so a
    // panicking holder cannot leave it half-updated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Bulkhead>> {
        self.bulkheads.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Bulkhead>> {
        self.bulkheads.write().unwrap_or_else(PoisonError::into_inner)
    }
}
