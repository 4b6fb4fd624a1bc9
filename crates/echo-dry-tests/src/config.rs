// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config documents held in memory, with an access log and fault injection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use echo_txn::config::CONFIG_KEY;
use echo_txn::{ConfigError, ConfigStore};

/// Which side of the store is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// Both reads and writes succeed.
    #[default]
    None,
    /// `load_raw` returns [`ConfigError::Unavailable`].
    Read,
    /// `save_raw` returns [`ConfigError::Unavailable`] and stores nothing.
    Write,
}

/// One call made against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// `load_raw(key)`.
    Read(String),
    /// `save_raw(key, ..)`.
    Write(String),
}

/// In-memory [`ConfigStore`].
///
/// Clones share their documents, so a test can hand one clone to a
/// [`echo_txn::ConfigService`] and inspect the other afterwards.
///
/// ```
/// use echo_dry_tests::InMemoryConfigStore;
/// use echo_txn::{ConfigService, TxnConfig};
///
/// let store = InMemoryConfigStore::new();
/// TxnConfig::default().save(&ConfigService::new(store.clone())).unwrap();
/// assert!(store.document(echo_txn::config::CONFIG_KEY).is_some());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    shared: Arc<Mutex<Documents>>,
}

#[derive(Default)]
struct Documents {
    by_key: BTreeMap<String, Vec<u8>>,
    log: Vec<Access>,
    fault: Fault,
}

impl InMemoryConfigStore {
    /// Store with no documents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose engine config document is `json`.
    pub fn with_txn_config(json: &str) -> Self {
        let store = Self::new();
        store
            .documents()
            .by_key
            .insert(CONFIG_KEY.to_owned(), json.as_bytes().to_vec());
        store
    }

    fn documents(&self) -> MutexGuard<'_, Documents> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Breaks reads or writes from now on.
    pub fn inject(&self, fault: Fault) {
        self.documents().fault = fault;
    }

    /// Every call so far, failed ones included.
    pub fn accesses(&self) -> Vec<Access> {
        self.documents().log.clone()
    }

    /// Bytes currently stored under `key`.
    pub fn document(&self, key: &str) -> Option<Vec<u8>> {
        self.documents().by_key.get(key).cloned()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut docs = self.documents();
        docs.log.push(Access::Read(key.to_owned()));
        if docs.fault == Fault::Read {
            return Err(ConfigError::Unavailable(format!("injected read fault for {key}")));
        }
        docs.by_key
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::Missing(key.to_owned()))
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut docs = self.documents();
        docs.log.push(Access::Write(key.to_owned()));
        if docs.fault == Fault::Write {
            return Err(ConfigError::Unavailable(format!("injected write fault for {key}")));
        }
        docs.by_key.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_txn::{ConfigService, TxnConfig};

    #[test]
    fn seeded_document_is_read_once() -> Result<(), ConfigError> {
        let store = InMemoryConfigStore::with_txn_config(r#"{ "warn_off_context": false }"#);
        let config = TxnConfig::load(&ConfigService::new(store.clone()))?;
        assert!(!config.warn_off_context);
        assert!(config.split_on_foreign_container);
        assert_eq!(store.accesses(), vec![Access::Read(CONFIG_KEY.to_owned())]);
        Ok(())
    }

    #[test]
    fn read_fault_reaches_the_caller() {
        let store = InMemoryConfigStore::new();
        store.inject(Fault::Read);
        let result = TxnConfig::load(&ConfigService::new(store));
        assert!(matches!(result, Err(ConfigError::Unavailable(msg)) if msg.contains("read fault")));
    }

    #[test]
    fn write_fault_leaves_no_document() {
        let store = InMemoryConfigStore::new();
        store.inject(Fault::Write);
        let result = TxnConfig::default().save(&ConfigService::new(store.clone()));
        assert!(result.is_err());
        assert_eq!(store.accesses().len(), 1);
        assert!(store.document(CONFIG_KEY).is_none());
    }

    #[test]
    fn saved_document_is_json() -> Result<(), Box<dyn std::error::Error>> {
        let store = InMemoryConfigStore::new();
        TxnConfig::default().save(&ConfigService::new(store.clone()))?;
        let raw = store.document(CONFIG_KEY).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        assert_eq!(value["split_on_foreign_container"], serde_json::json!(true));
        Ok(())
    }
}
