// src/lib.rs

pub mod types;
pub mod storage;
pub mod repository;
pub mod ledger;
pub mod dispatch;
pub mod config;
pub mod runtime;

pub use ledger::{ErrorKind, Ledger, LedgerError};
pub use runtime::Runtime;
pub use storage::{MemStorage, SledStorage, StateStore};
pub use types::{Account, DIAGNOSTIC_KEY, INITIAL_BALANCE};
