//! Serialized execution of ledger functions over a configured state store.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::{LedgerConfig, StoreBackend};
use crate::dispatch::{Dispatcher, InvocationKind, Payload};
use crate::ledger::{AuditReport, Ledger, LedgerError};
use crate::storage::{MemStorage, SledStorage, StateStore, StorageBatch, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
}

/// A ledger instance together with its dispatch table.
///
/// Calls are serialized: at most one invocation runs against the store at a
/// time, even when the runtime is shared between threads.
pub struct Runtime<S: StateStore> {
    storage: Arc<S>,
    ledger: Ledger<S>,
    dispatcher: Dispatcher<S>,
    gate: Mutex<()>,
}

impl<S: StateStore> Runtime<S> {
    pub fn new(storage: S) -> Self {
        let storage = Arc::new(storage);
        Runtime {
            ledger: Ledger::new(Arc::clone(&storage)),
            dispatcher: Dispatcher::new(),
            storage,
            gate: Mutex::new(()),
        }
    }

    /// Run a state-changing function (`init`, `createAccount`, `set_user`, `write`).
    pub fn invoke(&self, function: &str, args: &[String]) -> Result<Payload, LedgerError> {
        self.call(InvocationKind::Invoke, function, args)
    }

    /// Run a read-only function (`read`).
    pub fn query(&self, function: &str, args: &[String]) -> Result<Payload, LedgerError> {
        self.call(InvocationKind::Query, function, args)
    }

    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        let _serialized = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.ledger.audit()
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn call(
        &self,
        kind: InvocationKind,
        function: &str,
        args: &[String],
    ) -> Result<Payload, LedgerError> {
        // The guard holds no data, so a poisoned lock is still usable.
        let _serialized = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.dispatcher.dispatch(&self.ledger, kind, function, args)
    }
}

/// Store selected at startup from a [`LedgerConfig`].
pub enum ConfiguredStore {
    Sled(SledStorage),
    Memory(MemStorage),
}

impl StateStore for ConfiguredStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self {
            ConfiguredStore::Sled(s) => s.get(key),
            ConfiguredStore::Memory(s) => s.get(key),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        match self {
            ConfiguredStore::Sled(s) => s.put(key, value),
            ConfiguredStore::Memory(s) => s.put(key, value),
        }
    }

    fn apply_batch(&self, batch: StorageBatch) -> Result<(), StorageError> {
        match self {
            ConfiguredStore::Sled(s) => s.apply_batch(batch),
            ConfiguredStore::Memory(s) => s.apply_batch(batch),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            ConfiguredStore::Sled(s) => s.contains(key),
            ConfiguredStore::Memory(s) => s.contains(key),
        }
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        match self {
            ConfiguredStore::Sled(s) => s.entries(),
            ConfiguredStore::Memory(s) => s.entries(),
        }
    }
}

pub fn open_runtime(config: &LedgerConfig) -> Result<Runtime<ConfiguredStore>, RuntimeError> {
    let store = match config.backend {
        StoreBackend::Sled => {
            info!(
                path = %config.data_dir.display(),
                tree = %config.tree_name,
                "opening sled store"
            );
            ConfiguredStore::Sled(SledStorage::open(
                &config.data_dir,
                &config.tree_name,
                config.flush_on_commit,
            )?)
        }
        StoreBackend::Memory => {
            info!("using in-memory store");
            ConfiguredStore::Memory(MemStorage::new())
        }
    };
    Ok(Runtime::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ErrorKind;
    use tempfile::TempDir;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_invoke_and_query() {
        let runtime = Runtime::new(MemStorage::new());
        runtime.invoke("init", &args(&["99"])).unwrap();
        runtime.invoke("createAccount", &args(&["alice"])).unwrap();
        assert_eq!(runtime.query("read", &args(&["abc"])).unwrap(), Some(b"99".to_vec()));
        assert_eq!(runtime.ledger().balance("alice").unwrap(), 500);
        assert_eq!(runtime.storage().len(), 2);
    }

    #[test]
    fn test_query_cannot_mutate() {
        let runtime = Runtime::new(MemStorage::new());
        let err = runtime.query("write", &args(&["k", "v"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownFunction);
        assert!(runtime.storage().is_empty());
    }

    #[test]
    fn test_open_sled_runtime_persists() {
        let dir = TempDir::new().unwrap();
        let config = LedgerConfig {
            data_dir: dir.path().join("ledger"),
            ..LedgerConfig::default()
        };
        {
            let runtime = open_runtime(&config).unwrap();
            runtime.invoke("createAccount", &args(&["alice"])).unwrap();
            runtime.invoke("createAccount", &args(&["bob"])).unwrap();
            runtime.invoke("set_user", &args(&["alice", "200", "bob"])).unwrap();
        }
        let runtime = open_runtime(&config).unwrap();
        assert_eq!(runtime.ledger().balance("alice").unwrap(), 300);
        assert_eq!(runtime.ledger().balance("bob").unwrap(), 700);
        let err = runtime.invoke("createAccount", &args(&["alice"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_open_memory_runtime() {
        let runtime = open_runtime(&LedgerConfig::in_memory()).unwrap();
        assert!(matches!(runtime.storage(), ConfiguredStore::Memory(_)));
        assert_eq!(runtime.audit().unwrap().accounts, 0);
    }
}
