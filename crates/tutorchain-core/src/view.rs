//! Display models for the connection affordance and wallet header.

use serde::Serialize;

use crate::wallet::{Address, ChainId, WalletState};

/// Checksummed head and tail of an address: `0x1234...AbCd`.
pub fn short_address(address: &Address) -> String {
    let full = address.to_checksum(None);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Friendly network label. Empty when no network is known.
pub fn network_name(chain_id: Option<ChainId>) -> String {
    match chain_id {
        Some(ChainId::ETHEREUM) => "Ethereum".to_string(),
        Some(ChainId::POLYGON) => "Polygon".to_string(),
        Some(ChainId::GOERLI) => "Goerli".to_string(),
        Some(other) => format!("Chain ID: {}", other),
        None => String::new(),
    }
}

/// What the connect control shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectButtonView {
    /// Last attempt failed; clicking retries.
    Error { message: String },
    Connected { account: String, network: String },
    Connecting,
    Connect,
}

impl ConnectButtonView {
    /// An error wins over everything else, then a connected account, then a
    /// pending attempt.
    pub fn from_state(state: &WalletState, connecting: bool) -> Self {
        if let Some(message) = state.error_message() {
            return ConnectButtonView::Error { message };
        }
        if let Some(account) = state.connected_account() {
            return ConnectButtonView::Connected {
                account: short_address(&account),
                network: network_name(state.chain_id),
            };
        }
        if connecting {
            ConnectButtonView::Connecting
        } else {
            ConnectButtonView::Connect
        }
    }

    pub fn label(&self) -> String {
        match self {
            ConnectButtonView::Error { message } => message.clone(),
            ConnectButtonView::Connected { account, network } if network.is_empty() => {
                account.clone()
            }
            ConnectButtonView::Connected { account, network } => {
                format!("{} ({})", account, network)
            }
            ConnectButtonView::Connecting => "Connecting...".to_string(),
            ConnectButtonView::Connect => "Connect Wallet".to_string(),
        }
    }

    /// Whether activating the control starts a connect attempt.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            ConnectButtonView::Error { .. } | ConnectButtonView::Connect
        )
    }
}
