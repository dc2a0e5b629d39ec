//! Account-aware access to the state store.
//!
//! The repository is the only place that turns raw state values into
//! [`Account`]s. It keeps "nothing stored under this id" (`Ok(None)`) apart
//! from "something is stored but it is not an account" ([`RepositoryError::Decode`]).

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::storage::{StateStore, StorageBatch, StorageError};
use crate::types::{Account, AccountId, CodecError};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
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
    #[error("Account already exists: {0}")]
    AlreadyExists(AccountId),
}

pub struct AccountRepository<S: StateStore> {
    store: Arc<S>,
}

impl<S: StateStore> Clone for AccountRepository<S> {
    fn clone(&self) -> Self {
        AccountRepository {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: StateStore> AccountRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        AccountRepository { store }
    }

    /// Look up an account by id.
    ///
    /// A stored account whose `ID` differs from the key it lives under is
    /// reported as undecodable: saving it back would write a different key.
    pub fn find(&self, id: &str) -> Result<Option<Account>, RepositoryError> {
        let Some(bytes) = self.store.get(id)? else {
            return Ok(None);
        };
        let account = Account::decode(&bytes).map_err(|source| RepositoryError::Decode {
            id: id.to_string(),
            source,
        })?;
        if account.id != id {
            return Err(RepositoryError::Decode {
                id: id.to_string(),
                source: CodecError::Malformed(format!(
                    "stored id {:?} does not match key",
                    account.id
                )),
            });
        }
        Ok(Some(account))
    }

    /// Persist a new account unless the id is already taken.
    ///
    /// Any value occupying the key, decodable or not, counts as taken.
    pub fn create(&self, id: &str, initial_balance: u64) -> Result<Account, RepositoryError> {
        if self.store.contains(id)? {
            debug!(id, "account key already occupied");
            return Err(RepositoryError::AlreadyExists(id.to_string()));
        }

        let account = Account::new(id, initial_balance);
        self.save(&account)?;
        Ok(account)
    }

    /// Unconditionally write the account under its own id.
    pub fn save(&self, account: &Account) -> Result<(), RepositoryError> {
        let bytes = self.encode(account)?;
        self.store.put(&account.id, &bytes)?;
        Ok(())
    }

    /// Write several accounts as one atomic batch.
    pub fn save_all(&self, accounts: &[&Account]) -> Result<(), RepositoryError> {
        let mut batch = StorageBatch::new();
        for account in accounts {
            batch.put(account.id.clone(), self.encode(account)?);
        }
        self.store.apply_batch(batch)?;
        Ok(())
    }

    /// Every stored value that decodes as an account, in key order.
    ///
    /// Keys holding anything else (the diagnostic key, raw writes) are skipped.
    pub fn scan(&self) -> Result<Vec<Account>, RepositoryError> {
        let accounts = self
            .store
            .entries()?
            .into_iter()
            .filter_map(|(key, bytes)| match Account::decode(&bytes) {
                Ok(account) if account.id == key => Some(account),
                _ => None,
            })
            .collect();
        Ok(accounts)
    }

    fn encode(&self, account: &Account) -> Result<Vec<u8>, RepositoryError> {
        account.encode().map_err(|source| RepositoryError::Encode {
            id: account.id.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use crate::types::INITIAL_BALANCE;

    fn repo() -> (Arc<MemStorage>, AccountRepository<MemStorage>) {
        let store = Arc::new(MemStorage::new());
        (Arc::clone(&store), AccountRepository::new(store))
    }

    #[test]
    fn test_find_missing_is_none() {
        let (_, repo) = repo();
        assert_eq!(repo.find("ghost").unwrap(), None);
    }

    #[test]
    fn test_find_undecodable_is_decode_error() {
        let (store, repo) = repo();
        store.put("junk", b"not an account").unwrap();
        store.put("blank", b"").unwrap();

        for id in ["junk", "blank"] {
            match repo.find(id) {
                Err(RepositoryError::Decode { id: got, source }) => {
                    assert_eq!(got, id);
                    assert_eq!(source.reason(), "malformed");
                }
                other => panic!("expected decode error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_find_rejects_id_mismatch() {
        let (store, repo) = repo();
        store
            .put("mallory", &Account::new("alice", 1_000_000).encode().unwrap())
            .unwrap();
        assert!(matches!(repo.find("mallory"), Err(RepositoryError::Decode { .. })));
    }

    #[test]
    fn test_create_then_find() {
        let (_, repo) = repo();
        let created = repo.create("alice", INITIAL_BALANCE).unwrap();
        assert_eq!(created, Account::new("alice", 500));
        assert_eq!(repo.find("alice").unwrap(), Some(created));
    }

    #[test]
    fn test_create_twice_keeps_first_account() {
        let (_, repo) = repo();
        let mut alice = repo.create("alice", INITIAL_BALANCE).unwrap();
        alice.cash_balance = 120;
        repo.save(&alice).unwrap();

        let err = repo.create("alice", INITIAL_BALANCE).unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(ref id) if id == "alice"));
        assert_eq!(repo.find("alice").unwrap().unwrap().cash_balance, 120);
    }

    #[test]
    fn test_create_over_garbage_is_already_exists() {
        let (store, repo) = repo();
        store.put("x", b"{broken").unwrap();
        assert!(matches!(
            repo.create("x", INITIAL_BALANCE),
            Err(RepositoryError::AlreadyExists(_))
        ));
        assert_eq!(store.get("x").unwrap(), Some(b"{broken".to_vec()));
    }

    #[test]
    fn test_save_all_and_scan() {
        let (store, repo) = repo();
        store.put("abc", b"7").unwrap();
        let a = Account::new("a", 10);
        let b = Account::new("b", 20);
        repo.save_all(&[&b, &a]).unwrap();

        assert_eq!(repo.scan().unwrap(), vec![a, b]);
    }
}
