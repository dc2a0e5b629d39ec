//! State store: a flat namespace of string keys mapped to byte values.
//!
//! The ledger only ever talks to the [`StateStore`] trait. Two backends are
//! provided: [`SledStorage`] for durable on-disk state and [`MemStorage`],
//! an in-memory map used by tests and throwaway runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use sled::{Db, Tree};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait StateStore: Send + Sync {
    /// Returns `Ok(None)` when the key has never been written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Apply every operation in the batch, or none of them.
    fn apply_batch(&self, batch: StorageBatch) -> Result<(), StorageError>;

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries in ascending key order.
    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageBatch {
    pub ops: Vec<StorageOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOperation {
    Put(String, Vec<u8>),
}

impl StorageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(StorageOperation::Put(key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub struct SledStorage {
    _db: Db,
    state_tree: Tree,
    flush_on_commit: bool,
}

impl SledStorage {
    pub fn open(
        path: impl AsRef<Path>,
        tree_name: &str,
        flush_on_commit: bool,
    ) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            state_tree: db.open_tree(tree_name)?,
            _db: db,
            flush_on_commit,
        })
    }

    /// Open a sled database that is removed when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            state_tree: db.open_tree("state")?,
            _db: db,
            flush_on_commit: false,
        })
    }

    fn commit(&self) -> Result<(), StorageError> {
        if self.flush_on_commit {
            self.state_tree.flush()?;
        }
        Ok(())
    }
}

impl StateStore for SledStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let encoded = self.state_tree.get(key)?;
        Ok(encoded.map(|e| e.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.state_tree.insert(key, value)?;
        self.commit()
    }

    fn apply_batch(&self, batch: StorageBatch) -> Result<(), StorageError> {
        let mut tree_batch = sled::Batch::default();
        for op in batch.ops {
            match op {
                StorageOperation::Put(key, value) => {
                    tree_batch.insert(key.as_bytes(), value);
                }
            }
        }
        self.state_tree.apply_batch(tree_batch)?;
        self.commit()
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.state_tree.contains_key(key)?)
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        for item in self.state_tree.iter() {
            let (key, value) = item?;
            match String::from_utf8(key.to_vec()) {
                Ok(key) => entries.push((key, value.to_vec())),
                Err(_) => warn!(key = %hex::encode(&key), "skipping non-utf8 state key"),
            }
        }
        Ok(entries)
    }
}

/// In-memory store backed by a `BTreeMap` for deterministic key order.
#[derive(Debug, Default)]
pub struct MemStorage {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn apply_batch(&self, batch: StorageBatch) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        debug!(ops = batch.len(), "applying batch");
        for op in batch.ops {
            match op {
                StorageOperation::Put(key, value) => {
                    data.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
