//! Wallet provider backed by an EIP-1193 style JSON-RPC endpoint.
//!
//! HTTP has no push channel, so `accountsChanged` / `chainChanged` are derived
//! by polling `eth_accounts` and `eth_chainId` and diffing against the last
//! observed values.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::listeners::ListenerRegistry;
use super::rpc::{decode_result, RpcError, RpcTransport};
use super::{
    ListenerId, Network, NotificationHandler, ProviderError, ProviderEventKind,
    ProviderNotification, WalletProvider, METHOD_NOT_FOUND_CODE,
};
use crate::wallet::types::{Address, ChainId};

impl From<RpcError> for ProviderError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Rpc { code, message } => ProviderError::Rpc { code, message },
            RpcError::Transport(msg) => ProviderError::Transport(msg),
            RpcError::InvalidResponse(msg) => ProviderError::InvalidResponse(msg),
        }
    }
}

/// Last values seen by [`JsonRpcProvider::poll`]. `None` until the first poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub accounts: Option<Vec<Address>>,
    pub chain_id: Option<ChainId>,
}

impl Observed {
    /// Record a fresh reading and return the notifications it implies.
    ///
    /// Nothing is reported for a field seen for the first time. Accounts are
    /// reported before the chain.
    pub fn update(&mut self, accounts: Vec<Address>, chain_id: ChainId) -> Vec<ProviderNotification> {
        let mut changes = Vec::new();
        if matches!(&self.accounts, Some(previous) if *previous != accounts) {
            changes.push(ProviderNotification::AccountsChanged(accounts.clone()));
        }
        if matches!(self.chain_id, Some(previous) if previous != chain_id) {
            changes.push(ProviderNotification::ChainChanged(chain_id));
        }
        self.accounts = Some(accounts);
        self.chain_id = Some(chain_id);
        changes
    }
}

pub struct JsonRpcProvider {
    transport: Arc<dyn RpcTransport>,
    listeners: ListenerRegistry,
    observed: Mutex<Observed>,
}

impl JsonRpcProvider {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            listeners: ListenerRegistry::new(),
            observed: Mutex::new(Observed::default()),
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let value = self.transport.request("eth_accounts", json!([])).await?;
        Ok(decode_result("eth_accounts", value)?)
    }

    async fn chain_id(&self) -> Result<ChainId, ProviderError> {
        let value = self.transport.request("eth_chainId", json!([])).await?;
        parse_chain_id(&value)
    }

    /// Check the endpoint for account or network changes and notify subscribers.
    ///
    /// The first poll only records a baseline. Returns the notifications that
    /// were dispatched, in dispatch order (accounts before chain).
    pub async fn poll(&self) -> Result<Vec<ProviderNotification>, ProviderError> {
        let accounts = self.accounts().await?;
        let chain_id = self.chain_id().await?;

        let pending = self.observed.lock().unwrap().update(accounts, chain_id);

        for notification in &pending {
            log::info!("Provider {} detected", notification.kind().as_str());
            self.listeners.dispatch(notification);
        }
        Ok(pending)
    }

    /// Poll on a fixed interval until the returned handle is dropped.
    ///
    /// The watcher holds only a weak reference, so it also stops once the
    /// provider itself is gone.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> WatcherHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(provider) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = provider.poll().await {
                    log::warn!("Provider poll failed: {}", e);
                }
            }
            log::debug!("Provider watcher stopped");
        });
        WatcherHandle { task }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        match self.transport.request("eth_requestAccounts", json!([])).await {
            Ok(value) => Ok(decode_result("eth_requestAccounts", value)?),
            // Plain nodes do not implement the permission flow.
            Err(RpcError::Rpc { code, .. }) if code == METHOD_NOT_FOUND_CODE => {
                log::debug!("eth_requestAccounts unsupported, falling back to eth_accounts");
                self.accounts().await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_network(&self) -> Result<Network, ProviderError> {
        Ok(Network {
            chain_id: self.chain_id().await?,
        })
    }

    async fn signer_address(&self) -> Result<Address, ProviderError> {
        self.accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(ProviderError::NoSigner)
    }

    fn subscribe(&self, kind: ProviderEventKind, handler: NotificationHandler) -> ListenerId {
        self.listeners.add(kind, handler)
    }

    fn unsubscribe(&self, kind: ProviderEventKind, id: &ListenerId) -> bool {
        self.listeners.remove(kind, id)
    }
}

/// Stops the background poller when dropped.
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn stop(self) {}
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parse_chain_id(value: &Value) -> Result<ChainId, ProviderError> {
    match value {
        Value::String(s) => s
            .parse::<ChainId>()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string())),
        Value::Number(n) => n
            .as_u64()
            .map(ChainId)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("invalid chain id: {}", n))),
        other => Err(ProviderError::InvalidResponse(format!(
            "invalid chain id: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const BOB: &str = "0x0000000000000000000000000000000000000b0b";

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn provider_with(transport: &Arc<MockTransport>) -> JsonRpcProvider {
        let transport: Arc<dyn RpcTransport> = transport.clone();
        JsonRpcProvider::new(transport)
    }

    mod parsing {
        use super::*;

        #[test]
        fn chain_id_from_hex_or_number() {
            assert_eq!(parse_chain_id(&json!("0x89")).unwrap(), ChainId(137));
            assert_eq!(parse_chain_id(&json!(5)).unwrap(), ChainId(5));
            assert!(parse_chain_id(&json!(null)).is_err());
        }

        #[tokio::test]
        async fn accounts_reject_malformed_entries() {
            let transport = Arc::new(MockTransport::new());
            transport.respond("eth_requestAccounts", json!(["0xA"]));
            let result = provider_with(&transport).request_accounts().await;
            assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
        }

        #[tokio::test]
        async fn checksummed_accounts_parse() {
            let transport = Arc::new(MockTransport::new());
            transport.respond(
                "eth_requestAccounts",
                json!(["0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"]),
            );
            let accounts = provider_with(&transport).request_accounts().await.unwrap();
            assert_eq!(accounts, vec![addr("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")]);
        }
    }

    mod requests {
        use super::*;

        #[tokio::test]
        async fn falls_back_to_eth_accounts_on_plain_nodes() {
            let transport = Arc::new(MockTransport::new());
            transport.respond("eth_accounts", json!([ALICE]));

            let accounts = provider_with(&transport).request_accounts().await.unwrap();

            assert_eq!(accounts, vec![addr(ALICE)]);
            let methods: Vec<String> = transport.requests().into_iter().map(|(m, _)| m).collect();
            assert_eq!(methods, vec!["eth_requestAccounts", "eth_accounts"]);
        }

        #[tokio::test]
        async fn user_rejection_is_not_retried() {
            let transport = Arc::new(MockTransport::new());
            transport.fail(
                "eth_requestAccounts",
                RpcError::Rpc {
                    code: 4001,
                    message: "denied".into(),
                },
            );
            transport.respond("eth_accounts", json!([ALICE]));

            let result = provider_with(&transport).request_accounts().await;

            assert!(matches!(result, Err(ref e) if e.is_user_rejection()));
            assert!(transport.requests_for("eth_accounts").is_empty());
        }

        #[tokio::test]
        async fn signer_is_first_account() {
            let transport = Arc::new(MockTransport::new());
            transport.respond("eth_accounts", json!([BOB, ALICE]));
            assert_eq!(provider_with(&transport).signer_address().await.unwrap(), addr(BOB));

            transport.respond("eth_accounts", json!([]));
            assert_eq!(
                provider_with(&transport).signer_address().await,
                Err(ProviderError::NoSigner)
            );
        }
    }

    mod observed {
        use super::*;

        #[test]
        fn first_reading_is_a_baseline() {
            let mut observed = Observed::default();
            assert!(observed.update(vec![addr(ALICE)], ChainId(1)).is_empty());
            assert_eq!(observed.chain_id, Some(ChainId(1)));
        }

        #[test]
        fn unchanged_reading_reports_nothing() {
            let mut observed = Observed::default();
            observed.update(vec![addr(ALICE)], ChainId(1));
            assert!(observed.update(vec![addr(ALICE)], ChainId(1)).is_empty());
        }

        #[test]
        fn account_change_is_reported() {
            let mut observed = Observed::default();
            observed.update(vec![addr(ALICE)], ChainId(1));
            assert_eq!(
                observed.update(vec![addr(BOB)], ChainId(1)),
                vec![ProviderNotification::AccountsChanged(vec![addr(BOB)])]
            );
            assert_eq!(
                observed.update(vec![], ChainId(1)),
                vec![ProviderNotification::AccountsChanged(vec![])]
            );
        }

        #[test]
        fn chain_change_is_reported() {
            let mut observed = Observed::default();
            observed.update(vec![], ChainId(1));
            assert_eq!(
                observed.update(vec![], ChainId::POLYGON),
                vec![ProviderNotification::ChainChanged(ChainId::POLYGON)]
            );
        }

        #[test]
        fn accounts_come_before_chain() {
            let mut observed = Observed::default();
            observed.update(vec![addr(ALICE)], ChainId(1));
            assert_eq!(
                observed.update(vec![addr(BOB)], ChainId(5)),
                vec![
                    ProviderNotification::AccountsChanged(vec![addr(BOB)]),
                    ProviderNotification::ChainChanged(ChainId(5)),
                ]
            );
        }
    }

    mod polling {
        use super::*;

        #[tokio::test]
        async fn poll_dispatches_changes_to_subscribers() {
            let transport = Arc::new(MockTransport::new());
            transport.respond("eth_accounts", json!([ALICE]));
            transport.respond("eth_chainId", json!("0x1"));
            let provider = provider_with(&transport);

            let seen = Arc::new(Mutex::new(Vec::new()));
            for kind in [ProviderEventKind::AccountsChanged, ProviderEventKind::ChainChanged] {
                let sink = Arc::clone(&seen);
                provider.subscribe(kind, Arc::new(move |n: &ProviderNotification| {
                    sink.lock().unwrap().push(n.clone())
                }));
            }

            assert!(provider.poll().await.unwrap().is_empty());
            assert!(seen.lock().unwrap().is_empty());

            transport.respond("eth_accounts", json!([BOB]));
            transport.respond("eth_chainId", json!("0x89"));
            let dispatched = provider.poll().await.unwrap();

            let expected = vec![
                ProviderNotification::AccountsChanged(vec![addr(BOB)]),
                ProviderNotification::ChainChanged(ChainId::POLYGON),
            ];
            assert_eq!(dispatched, expected);
            assert_eq!(*seen.lock().unwrap(), expected);
        }

        #[tokio::test]
        async fn failed_poll_keeps_baseline() {
            let transport = Arc::new(MockTransport::new());
            transport.respond("eth_accounts", json!([ALICE]));
            transport.respond("eth_chainId", json!("0x1"));
            let provider = provider_with(&transport);
            provider.poll().await.unwrap();

            transport.fail("eth_chainId", RpcError::Transport("down".into()));
            assert!(provider.poll().await.is_err());

            transport.respond("eth_chainId", json!("0x1"));
            assert!(provider.poll().await.unwrap().is_empty());
        }
    }

    mod errors {
        use super::*;
        use crate::logging;
        use crate::provider::rpc::RpcClient;

        #[test]
        fn rpc_error_keeps_code() {
            let err: ProviderError = RpcError::Rpc {
                code: 4001,
                message: "denied".into(),
            }
            .into();
            assert!(err.is_user_rejection());
        }

        #[tokio::test]
        async fn unreachable_endpoint_fails_request_accounts() {
            let provider = JsonRpcProvider::new(Arc::new(RpcClient::new(
                "http://127.0.0.1:1",
                logging::disabled(),
            )));
            let result = provider.request_accounts().await;
            assert!(matches!(result, Err(ProviderError::Transport(_))));
        }
    }

    #[test]
    fn subscriptions_go_through_registry() {
        let provider = provider_with(&Arc::new(MockTransport::new()));
        let id = provider.subscribe(ProviderEventKind::ChainChanged, Arc::new(|_| {}));
        assert!(provider.unsubscribe(ProviderEventKind::ChainChanged, &id));
        assert!(!provider.unsubscribe(ProviderEventKind::ChainChanged, &id));
    }
}
