//! Ledger configuration.

use std::path::PathBuf;

/// Where ledger state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// sled database under `data_dir`.
    Sled,
    /// Process-local map, discarded on exit.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub backend: StoreBackend,
    /// Directory of the sled database. Ignored by the memory backend.
    pub data_dir: PathBuf,
    /// sled tree holding this ledger's key space.
    pub tree_name: String,
    /// Flush to disk after every committed write.
    pub flush_on_commit: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sled,
            data_dir: PathBuf::from("cashledger_data"),
            tree_name: "state".to_string(),
            flush_on_commit: true,
        }
    }
}

impl LedgerConfig {
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Self::default()
        }
    }
}
