//! Core type definitions for the cash ledger.
//!
//! An [`Account`] is persisted under its own id as a JSON object with the
//! keys `ID` and `CashBalance`. This module owns that byte form: everything
//! that reads or writes an account goes through [`Account::encode`] and
//! [`Account::decode`].

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Identifier of an account. Also the state key the account lives under.
pub type AccountId = String;

/// Balance every account starts with.
pub const INITIAL_BALANCE: u64 = 500;

/// Key written by `init` and used only as a store liveness probe.
pub const DIAGNOSTIC_KEY: &str = "abc";

/// Errors produced by the account codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed account value: {0}")]
    Malformed(String),
    #[error("failed to encode account: {0}")]
    Encode(String),
}

impl CodecError {
    /// Stable reason tag, independent of the parser's message text.
    pub fn reason(&self) -> &'static str {
        match self {
            CodecError::Malformed(_) => "malformed",
            CodecError::Encode(_) => "encode",
        }
    }
}

/// A ledger account.
///
/// The balance is unsigned, so a stored account can never hold a negative
/// balance; values that claim one fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "ID")]
    pub id: AccountId,
    #[serde(rename = "CashBalance", deserialize_with = "balance_from_number_or_string")]
    pub cash_balance: u64,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, cash_balance: u64) -> Self {
        Account {
            id: id.into(),
            cash_balance,
        }
    }

    /// Serialize the account into its stored form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Parse an account from its stored form.
    ///
    /// Empty input is malformed, not missing: absence is a store-level
    /// condition and is reported by the repository, never by the codec.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Malformed("empty value".to_string()));
        }
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

// Early deployments wrote `"CashBalance": "500"`; both forms are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBalance {
    Number(u64),
    Text(String),
}

fn balance_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawBalance::deserialize(deserializer)? {
        RawBalance::Number(n) => Ok(n),
        RawBalance::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid cash balance {:?}", s))),
    }
}
