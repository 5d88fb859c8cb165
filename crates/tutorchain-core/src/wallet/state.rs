//! Wallet connection state and its transitions.
//!
//! Every transition produces a whole new [`WalletState`]; the session swaps it in
//! under a single lock so readers never observe a half-applied update.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Address, ChainId};

/// Why a connect attempt failed.
///
/// All variants are terminal for the attempt. Nothing retries automatically;
/// the user has to trigger `connect` again.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ConnectionError {
    #[error("No wallet provider found. Please install a browser wallet")]
    ProviderUnavailable,

    #[error("No accounts found")]
    NoAccountsReturned,

    #[error("Request rejected by user: {0}")]
    UserRejected(String),

    #[error("{0}")]
    Provider(String),
}

/// Snapshot of the wallet connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    /// True iff an account address is currently known.
    pub connected: bool,
    pub account: Option<Address>,
    pub chain_id: Option<ChainId>,
    /// Most recent failed connect attempt, cleared when a new attempt starts.
    pub last_error: Option<ConnectionError>,
}

impl WalletState {
    /// Fresh, unconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// State committed by a successful connect.
    pub fn connected(account: Address, chain_id: ChainId) -> Self {
        Self {
            connected: true,
            account: Some(account),
            chain_id: Some(chain_id),
            last_error: None,
        }
    }

    /// Start of a connect attempt: only the previous error is dropped.
    pub fn begin_attempt(&self) -> Self {
        Self {
            last_error: None,
            ..self.clone()
        }
    }

    /// A failed attempt clears the session but keeps whatever network the
    /// provider last reported.
    pub fn after_failure(&self, error: ConnectionError) -> Self {
        Self {
            connected: false,
            account: None,
            chain_id: self.chain_id,
            last_error: Some(error),
        }
    }

    /// Apply an `accountsChanged` notification. The first account wins.
    pub fn with_accounts(&self, accounts: &[Address]) -> Self {
        match accounts.first() {
            Some(first) => Self {
                connected: true,
                account: Some(*first),
                chain_id: self.chain_id,
                // a live account supersedes the failure that preceded it
                last_error: None,
            },
            None => Self {
                connected: false,
                account: None,
                chain_id: self.chain_id,
                last_error: self.last_error.clone(),
            },
        }
    }

    /// Apply a `chainChanged` notification.
    pub fn with_chain(&self, chain_id: ChainId) -> Self {
        Self {
            chain_id: Some(chain_id),
            ..self.clone()
        }
    }

    /// Check the two structural invariants of the state.
    pub fn is_consistent(&self) -> bool {
        let connected_has_account = !self.connected || self.account.is_some();
        let error_means_disconnected =
            self.last_error.is_none() || (!self.connected && self.account.is_none());
        connected_has_account && error_means_disconnected
    }

    /// The account, only while connected.
    pub fn connected_account(&self) -> Option<Address> {
        if self.connected {
            self.account
        } else {
            None
        }
    }

    /// Human-readable error for the connection affordance.
    pub fn error_message(&self) -> Option<String> {
        self.last_error.as_ref().map(|e| e.to_string())
    }
}
