//! Ledger operations: account creation, transfers, the diagnostic key and
//! raw state access.
//!
//! Transfers stage both updated accounts and commit them through a single
//! [`StateStore::apply_batch`], so a failed write leaves both balances as
//! they were.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::repository::{AccountRepository, RepositoryError};
use crate::storage::{StateStore, StorageError};
use crate::types::{Account, AccountId, CodecError, DIAGNOSTIC_KEY, INITIAL_BALANCE};

/// Which end of a transfer an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSide {
    From,
    To,
}

impl fmt::Display for TransferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferSide::From => f.write_str("sender"),
            TransferSide::To => f.write_str("recipient"),
        }
    }
}

/// Stable, machine-readable classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidAmount,
    NotFound,
    DecodeError,
    EncodeError,
    AlreadyExists,
    AccountNotFound,
    InsufficientFunds,
    StoreError,
    UnknownFunction,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::DecodeError => "DECODE_ERROR",
            ErrorKind::EncodeError => "ENCODE_ERROR",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::StoreError => "STORE_ERROR",
            ErrorKind::UnknownFunction => "UNKNOWN_FUNCTION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid amount {amount:?}: {reason}")]
    InvalidAmount { amount: String, reason: String },
    #[error("No value stored for key {0}")]
    NotFound(String),
    #[error("Value under {id} is not a valid account: {source}")]
    Decode {
        id: AccountId,
        #[source]
        source: CodecError,
    },
    #[error("Account {id} could not be encoded: {source}")]
    Encode {
        id: AccountId,
        #[source]
        source: CodecError,
    },
    #[error("Can't reinitialize existing account {0}")]
    AlreadyExists(AccountId),
    #[error("The {side} account {id} does not exist")]
    AccountNotFound { side: TransferSide, id: AccountId },
    #[error("Insufficient funds in {id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        id: AccountId,
        balance: u64,
        requested: u64,
    },
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),
    #[error("Received unknown function invocation: {0}")]
    UnknownFunction(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Decode { .. } => ErrorKind::DecodeError,
            LedgerError::Encode { .. } | LedgerError::SerializationError(_) => {
                ErrorKind::EncodeError
            }
            LedgerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            LedgerError::AccountNotFound { .. } => ErrorKind::AccountNotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::StorageError(_) => ErrorKind::StoreError,
            LedgerError::UnknownFunction(_) => ErrorKind::UnknownFunction,
        }
    }
}

impl From<RepositoryError> for LedgerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StorageError(e) => LedgerError::StorageError(e),
            RepositoryError::Decode { id, source } => LedgerError::Decode { id, source },
            RepositoryError::Encode { id, source } => LedgerError::Encode { id, source },
            RepositoryError::AlreadyExists(id) => LedgerError::AlreadyExists(id),
        }
    }
}

/// Result of a reconciliation pass over every stored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub accounts: usize,
    pub total_balance: u128,
    /// Hex SHA-256 over the accounts in key order.
    pub state_digest: String,
}

/// Parse a transfer amount. Only non-negative integers are accepted.
pub fn parse_amount(raw: &str) -> Result<u64, LedgerError> {
    raw.parse::<u64>().map_err(|e| {
        let reason = if raw.parse::<i128>().map_or(false, |v| v < 0) {
            "amount must not be negative".to_string()
        } else {
            e.to_string()
        };
        LedgerError::InvalidAmount {
            amount: raw.to_string(),
            reason,
        }
    })
}

pub struct Ledger<S: StateStore> {
    storage: Arc<S>,
    accounts: AccountRepository<S>,
}

impl<S: StateStore> Ledger<S> {
    pub fn new(storage: Arc<S>) -> Self {
        let accounts = AccountRepository::new(Arc::clone(&storage));
        Ledger { storage, accounts }
    }

    pub fn accounts(&self) -> &AccountRepository<S> {
        &self.accounts
    }

    /// Write the diagnostic value. Calling it again overwrites the value and
    /// never touches accounts: an Account already stored under the diagnostic
    /// key is left in place and reported as `AlreadyExists`.
    pub fn init(&self, diagnostic_value: i64) -> Result<(), LedgerError> {
        match self.accounts.find(DIAGNOSTIC_KEY) {
            Ok(None) | Err(RepositoryError::Decode { .. }) => {}
            Ok(Some(account)) => {
                warn!(
                    key = DIAGNOSTIC_KEY,
                    balance = account.cash_balance,
                    "diagnostic key holds an account"
                );
                return Err(LedgerError::AlreadyExists(account.id));
            }
            Err(e) => return Err(e.into()),
        }
        self.storage
            .put(DIAGNOSTIC_KEY, diagnostic_value.to_string().as_bytes())?;
        info!(key = DIAGNOSTIC_KEY, value = diagnostic_value, "diagnostic key written");
        Ok(())
    }

    /// Create an account holding [`INITIAL_BALANCE`].
    ///
    /// The diagnostic key is reserved and cannot name an account.
    pub fn create_account(&self, id: &str) -> Result<Account, LedgerError> {
        if id.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "account id must not be empty".to_string(),
            ));
        }
        if id == DIAGNOSTIC_KEY {
            return Err(LedgerError::InvalidArgument(format!(
                "account id {:?} is reserved for the diagnostic value",
                id
            )));
        }
        match self.accounts.create(id, INITIAL_BALANCE) {
            Ok(account) => {
                info!(id, balance = account.cash_balance, "account created");
                Ok(account)
            }
            Err(e) => {
                warn!(id, error = %e, "account creation rejected");
                Err(e.into())
            }
        }
    }

    /// Move `amount` from one account to another.
    ///
    /// Both accounts must exist. An overdraft is rejected without any write.
    /// A transfer to the same account checks funds and leaves the balance
    /// untouched.
    pub fn transfer(&self, from_id: &str, to_id: &str, amount: u64) -> Result<(), LedgerError> {
        debug!(from = from_id, to = to_id, amount, "transfer requested");
        let mut from = self.load_party(from_id, TransferSide::From)?;
        let mut to = if from_id == to_id {
            None
        } else {
            Some(self.load_party(to_id, TransferSide::To)?)
        };

        if from.cash_balance < amount {
            warn!(
                from = from_id,
                balance = from.cash_balance,
                amount,
                "insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds {
                id: from.id,
                balance: from.cash_balance,
                requested: amount,
            });
        }

        let Some(to) = to.as_mut() else {
            debug!(id = from_id, amount, "self-transfer leaves balance unchanged");
            return Ok(());
        };
        if amount == 0 {
            return Ok(());
        }

        to.cash_balance = to.cash_balance.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidAmount {
                amount: amount.to_string(),
                reason: format!("recipient {} balance would overflow", to.id),
            }
        })?;
        from.cash_balance -= amount;

        self.accounts.save_all(&[&from, &*to])?;
        info!(
            from = from_id,
            to = to_id,
            amount,
            from_balance = from.cash_balance,
            to_balance = to.cash_balance,
            "transfer applied"
        );
        Ok(())
    }

    /// Current balance of an existing account.
    pub fn balance(&self, id: &str) -> Result<u64, LedgerError> {
        self.accounts
            .find(id)?
            .map(|a| a.cash_balance)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    /// Raw read that never interprets the value.
    pub fn read(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        self.storage
            .get(key)?
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))
    }

    /// Raw write that bypasses the account codec.
    pub fn write(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        self.storage.put(key, value)?;
        debug!(key, len = value.len(), "raw value written");
        Ok(())
    }

    /// Sum every stored account and fingerprint the account set.
    ///
    /// Comparing `total_balance` before and after a sequence of transfers
    /// checks conservation across the whole store.
    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        let accounts = self.accounts.scan()?;
        let total_balance = accounts.iter().map(|a| a.cash_balance as u128).sum();

        let mut hasher = Sha256::new();
        hasher.update(bincode::serialize(&accounts)?);
        let state_digest = hex::encode(hasher.finalize());

        Ok(AuditReport {
            accounts: accounts.len(),
            total_balance,
            state_digest,
        })
    }

    fn load_party(&self, id: &str, side: TransferSide) -> Result<Account, LedgerError> {
        self.accounts.find(id)?.ok_or_else(|| {
            warn!(id, %side, "transfer references a missing account");
            LedgerError::AccountNotFound {
                side,
                id: id.to_string(),
            }
        })
    }
}
