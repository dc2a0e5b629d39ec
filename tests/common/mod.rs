//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use cashledger::storage::{MemStorage, StateStore, StorageBatch, StorageError};
use cashledger::Runtime;

pub fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Memory runtime with the given accounts already created.
pub fn runtime_with(ids: &[&str]) -> Runtime<MemStorage> {
    let runtime = Runtime::new(MemStorage::new());
    for id in ids {
        runtime.invoke("createAccount", &args(&[*id])).unwrap();
    }
    runtime
}

pub fn balance<S: StateStore>(runtime: &Runtime<S>, id: &str) -> u64 {
    runtime.ledger().balance(id).unwrap()
}

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemStorage,
    fail_puts: AtomicBool,
    fail_batches: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("put {} refused", key)));
        }
        self.inner.put(key, value)
    }

    fn apply_batch(&self, batch: StorageBatch) -> Result<(), StorageError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "batch of {} refused",
                batch.len()
            )));
        }
        self.inner.apply_batch(batch)
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.inner.entries()
    }
}
