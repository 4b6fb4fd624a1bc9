// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration and its storage port.
//!
//! Configuration is a small serde struct persisted as JSON through a
//! [`ConfigStore`]. Hosts back the store with whatever they have (a file, a
//! settings database, an in-memory map in tests); the engine only sees
//! [`TxnConfig`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Default number of diagnostics kept before the oldest are evicted.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

/// Key the engine configuration is stored under.
pub const CONFIG_KEY: &str = "echo-txn";

/// Document storage the host supplies, keyed by document name.
pub trait ConfigStore {
    /// Bytes stored under `key`, or [`ConfigError::Missing`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replaces whatever is stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Why a config document could not be read or written.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing is stored under the key.
    #[error("no config document under {0:?}")]
    Missing(String),
    /// The backend refused the call.
    #[error("config backend unavailable: {0}")]
    Unavailable(String),
    /// The document is not valid JSON for the requested type.
    #[error("config document {key:?} is malformed: {source}")]
    Malformed {
        /// Document key.
        key: String,
        /// Decoder or encoder failure.
        #[source]
        source: serde_json::Error,
    },
}

/// JSON documents on top of a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Service reading and writing through `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Decodes the document under `key`. A missing or empty document reads
    /// as `None`.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Err(ConfigError::Missing(_)) => return Ok(None),
            other => other?,
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| malformed(key, source))
    }

    /// Encodes `value` as pretty JSON and stores it under `key`.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| malformed(key, source))?;
        self.store.save_raw(key, &bytes)
    }
}

fn malformed(key: &str, source: serde_json::Error) -> ConfigError {
    ConfigError::Malformed {
        key: key.to_owned(),
        source,
    }
}

/// Engine behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// Force-close the current batch when a transaction or unattributed
    /// change targets a container other than the batch's.
    pub split_on_foreign_container: bool,
    /// Emit a diagnostic when an operation arrives from an unexpected
    /// execution context.
    pub warn_off_context: bool,
    /// Emit a diagnostic when a partition applied changes without an event.
    pub report_dangling_mutations: bool,
    /// Diagnostics kept before the oldest are evicted.
    pub diagnostics_capacity: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            split_on_foreign_container: true,
            warn_off_context: true,
            report_dangling_mutations: true,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl TxnConfig {
    /// Loads the config stored under [`CONFIG_KEY`], or the defaults when
    /// nothing is stored. Missing fields take their default values.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        Ok(service.read(CONFIG_KEY)?.unwrap_or_default())
    }

    /// Stores this config under [`CONFIG_KEY`].
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.write(CONFIG_KEY, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapStore(RefCell<BTreeMap<String, Vec<u8>>>);

    impl ConfigStore for MapStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.0
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::Missing(key.to_owned()))
        }
        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.0.borrow_mut().insert(key.to_owned(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn missing_key_yields_defaults() -> Result<(), ConfigError> {
        let service = ConfigService::new(MapStore::default());
        assert_eq!(TxnConfig::load(&service)?, TxnConfig::default());
        Ok(())
    }

    #[test]
    fn partial_document_keeps_other_defaults() -> Result<(), ConfigError> {
        let store = MapStore::default();
        store.save_raw(CONFIG_KEY, br#"{ "split_on_foreign_container": false }"#)?;
        let config = TxnConfig::load(&ConfigService::new(store))?;
        assert!(!config.split_on_foreign_container);
        assert!(config.warn_off_context);
        assert_eq!(config.diagnostics_capacity, DEFAULT_DIAGNOSTICS_CAPACITY);
        Ok(())
    }

    #[test]
    fn save_then_load() -> Result<(), ConfigError> {
        let service = ConfigService::new(MapStore::default());
        let config = TxnConfig {
            diagnostics_capacity: 8,
            ..TxnConfig::default()
        };
        config.save(&service)?;
        assert_eq!(TxnConfig::load(&service)?, config);
        Ok(())
    }

    #[test]
    fn malformed_document_names_its_key() -> Result<(), ConfigError> {
        let store = MapStore::default();
        store.save_raw(CONFIG_KEY, b"{ split_on_foreign_container")?;
        let result = TxnConfig::load(&ConfigService::new(store));
        assert!(matches!(result, Err(ConfigError::Malformed { ref key, .. }) if key == CONFIG_KEY));
        Ok(())
    }

    #[test]
    fn empty_document_reads_as_defaults() -> Result<(), ConfigError> {
        let store = MapStore::default();
        store.save_raw(CONFIG_KEY, b"")?;
        assert_eq!(TxnConfig::load(&ConfigService::new(store))?, TxnConfig::default());
        Ok(())
    }
}
