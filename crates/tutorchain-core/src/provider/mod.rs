//! Wallet provider abstraction.
//!
//! A provider is the host-supplied capability that holds the user's keys:
//! it grants account access, reports the active network, and pushes
//! `accountsChanged` / `chainChanged` notifications. The session only ever
//! talks to it through [`WalletProvider`].

mod json_rpc;
mod listeners;
pub mod rpc;

pub use json_rpc::{JsonRpcProvider, Observed, WatcherHandle};
pub use listeners::ListenerRegistry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::wallet::types::{Address, ChainId};

/// EIP-1193 error code for a request the user declined.
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{message} (code {code})")]
    Rpc { code: i64, message: String },

    #[error("Provider transport failed: {0}")]
    Transport(String),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider has no signer account")]
    NoSigner,
}

impl ProviderError {
    /// True when the user declined the request in the wallet.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ProviderError::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }

    /// Message without the code suffix, for surfacing to the user.
    pub fn message(&self) -> String {
        match self {
            ProviderError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Network the provider is currently pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub chain_id: ChainId,
}

/// Notification channels a provider exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
}

impl ProviderEventKind {
    /// Event name as used by injected providers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEventKind::AccountsChanged => "accountsChanged",
            ProviderEventKind::ChainChanged => "chainChanged",
        }
    }
}

/// A notification pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderNotification {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
}

impl ProviderNotification {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            ProviderNotification::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            ProviderNotification::ChainChanged(_) => ProviderEventKind::ChainChanged,
        }
    }
}

/// Callback registered for provider notifications.
pub type NotificationHandler = Arc<dyn Fn(&ProviderNotification) + Send + Sync>;

/// Handle identifying a registered notification handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(pub String);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// The injected wallet provider contract.
///
/// `request_accounts` may suspend for as long as the user leaves a
/// permission prompt open; callers must not assume a timeout.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for account access.
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// Resolve the active network.
    async fn get_network(&self) -> Result<Network, ProviderError>;

    /// Address of the signer backing the first authorized account.
    async fn signer_address(&self) -> Result<Address, ProviderError>;

    /// Register a notification handler for `kind`.
    fn subscribe(&self, kind: ProviderEventKind, handler: NotificationHandler) -> ListenerId;

    /// Remove a handler. Returns false if it was not registered.
    fn unsubscribe(&self, kind: ProviderEventKind, id: &ListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_rejection_is_detected_by_code() {
        let err = ProviderError::Rpc {
            code: USER_REJECTED_CODE,
            message: "User rejected the request.".into(),
        };
        assert!(err.is_user_rejection());
        assert_eq!(err.message(), "User rejected the request.");

        let other = ProviderError::Rpc {
            code: -32000,
            message: "header not found".into(),
        };
        assert!(!other.is_user_rejection());
        assert_eq!(other.to_string(), "header not found (code -32000)");
    }

    #[test]
    fn event_kind_names_match_injected_providers() {
        assert_eq!(ProviderEventKind::AccountsChanged.as_str(), "accountsChanged");
        assert_eq!(ProviderEventKind::ChainChanged.as_str(), "chainChanged");
    }

    #[test]
    fn notification_reports_kind() {
        let n = ProviderNotification::ChainChanged(ChainId(1));
        assert_eq!(n.kind(), ProviderEventKind::ChainChanged);
        let n = ProviderNotification::AccountsChanged(vec![]);
        assert_eq!(n.kind(), ProviderEventKind::AccountsChanged);
    }

    #[test]
    fn listener_ids_are_unique() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }
}
