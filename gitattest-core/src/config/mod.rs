//! Configuration store adapter
//!
//! Signing decisions are driven by Git configuration. The store is an opaque
//! external key-value source: we never re-implement its scope precedence, we
//! ask the store for its merged view and parse the answer.

mod git;

pub use git::GitConfigStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::Result;

/// Flat snapshot of configuration keys to values
pub type ConfigMap = BTreeMap<String, String>;

/// How keys from the store are normalized while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    /// Keys are lowercased (externally exposed read path)
    Lowercase,
    /// Keys are kept exactly as the store printed them
    Verbatim,
}

/// Narrow read/write interface to a configuration store
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Merged configuration across all scopes, keys lowercased
    async fn read(&self) -> Result<ConfigMap>;

    /// Merged configuration across all scopes, keys verbatim
    async fn read_raw(&self) -> Result<ConfigMap>;

    /// Persist `key = value` at local (repository) scope
    async fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Parse `key value...` lines as printed by `git config --get-regexp`
///
/// The key runs up to the first space and the value is everything after it,
/// byte for byte. Lines with no space carry no value and are dropped.
pub fn parse_config_output(output: &str, case: KeyCase) -> ConfigMap {
    let mut config = ConfigMap::new();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };

        let key = match case {
            KeyCase::Lowercase => key.to_lowercase(),
            KeyCase::Verbatim => key.to_string(),
        };
        config.insert(key, value.to_string());
    }

    config
}

/// In-process configuration store
///
/// Writes and reads go to a shared map, so it behaves like a single-scope
/// store. Useful for embedding and for tests that must not touch the user's
/// Git configuration.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<ConfigMap>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn snapshot(&self) -> ConfigMap {
        match self.entries.read() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn read(&self) -> Result<ConfigMap> {
        Ok(self
            .snapshot()
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect())
    }

    async fn read_raw(&self) -> Result<ConfigMap> {
        Ok(self.snapshot())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
