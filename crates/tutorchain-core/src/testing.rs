//! Test doubles for the wallet provider, the contract gateway and the
//! JSON-RPC transport underneath both.
//!
//! All of them record every call for later assertion. Configure responses
//! with the `set_*` / `respond*` / `fail*` methods, then inspect
//! [`MockProvider::calls`], [`MockGateway::calls`] or
//! [`MockTransport::requests`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tutorchain_core::event_bus::EventBus;
//! use tutorchain_core::testing::MockProvider;
//! use tutorchain_core::wallet::{Address, ChainId, WalletSession};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let provider = Arc::new(MockProvider::new());
//! let account = Address::repeat_byte(0xab);
//! provider.set_accounts(vec![account]);
//! provider.set_chain_id(ChainId(1));
//! provider.set_signer(account);
//!
//! let session = WalletSession::new(Some(provider.clone()), Arc::new(EventBus::new()));
//! session.connect().await.unwrap();
//! assert!(session.is_connected());
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Notify};

use crate::gateway::{
    ContractGateway, GatewayError, Rating, SessionId, SessionRecord, TransactionReceipt,
    TutorRecord, TxHash,
};
use crate::provider::rpc::{RpcError, RpcTransport};
use crate::provider::{
    ListenerId, ListenerRegistry, Network, NotificationHandler, ProviderError, ProviderEventKind,
    ProviderNotification, WalletProvider, METHOD_NOT_FOUND_CODE,
};
use crate::wallet::types::{Address, ChainId, Wei};

/// Call recorded by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    RequestAccounts,
    GetNetwork,
    SignerAddress,
    Subscribe(ProviderEventKind),
    Unsubscribe(ProviderEventKind),
}

/// In-memory wallet provider.
pub struct MockProvider {
    accounts: Mutex<Result<Vec<Address>, ProviderError>>,
    network: Mutex<Result<ChainId, ProviderError>>,
    signer: Mutex<Result<Address, ProviderError>>,
    listeners: ListenerRegistry,
    calls: Mutex<Vec<MockCall>>,
    hold: Mutex<bool>,
    held: watch::Sender<bool>,
    release: Notify,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// A provider with no accounts, chain 1, and no signer.
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            accounts: Mutex::new(Ok(Vec::new())),
            network: Mutex::new(Ok(ChainId(1))),
            signer: Mutex::new(Err(ProviderError::NoSigner)),
            listeners: ListenerRegistry::new(),
            calls: Mutex::new(Vec::new()),
            hold: Mutex::new(false),
            held,
            release: Notify::new(),
        }
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().unwrap() = Ok(accounts);
    }

    pub fn fail_request_accounts(&self, error: ProviderError) {
        *self.accounts.lock().unwrap() = Err(error);
    }

    pub fn set_chain_id(&self, chain_id: ChainId) {
        *self.network.lock().unwrap() = Ok(chain_id);
    }

    pub fn fail_get_network(&self, error: ProviderError) {
        *self.network.lock().unwrap() = Err(error);
    }

    pub fn set_signer(&self, address: Address) {
        *self.signer.lock().unwrap() = Ok(address);
    }

    pub fn fail_signer(&self, error: ProviderError) {
        *self.signer.lock().unwrap() = Err(error);
    }

    /// Make the next `request_accounts` calls suspend, as a wallet prompt does,
    /// until [`release_request_accounts`](Self::release_request_accounts).
    pub fn hold_request_accounts(&self) {
        *self.hold.lock().unwrap() = true;
    }

    pub fn release_request_accounts(&self) {
        *self.hold.lock().unwrap() = false;
        self.release.notify_waiters();
    }

    /// Wait until a `request_accounts` call is suspended on the hold.
    pub async fn wait_until_held(&self) {
        let mut rx = self.held.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Push a notification to subscribers, as the wallet would.
    pub fn emit(&self, notification: ProviderNotification) -> usize {
        self.listeners.dispatch(&notification)
    }

    pub fn listener_count(&self, kind: ProviderEventKind) -> usize {
        self.listeners.count(kind)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WalletProvider for MockProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.record(MockCall::RequestAccounts);
        loop {
            // register interest before checking the flag so a release in
            // between is not missed
            let released = self.release.notified();
            if !*self.hold.lock().unwrap() {
                break;
            }
            self.held.send_replace(true);
            released.await;
        }
        self.held.send_replace(false);
        self.accounts.lock().unwrap().clone()
    }

    async fn get_network(&self) -> Result<Network, ProviderError> {
        self.record(MockCall::GetNetwork);
        let chain_id = self.network.lock().unwrap().clone()?;
        Ok(Network { chain_id })
    }

    async fn signer_address(&self) -> Result<Address, ProviderError> {
        self.record(MockCall::SignerAddress);
        self.signer.lock().unwrap().clone()
    }

    fn subscribe(&self, kind: ProviderEventKind, handler: NotificationHandler) -> ListenerId {
        self.record(MockCall::Subscribe(kind));
        self.listeners.add(kind, handler)
    }

    fn unsubscribe(&self, kind: ProviderEventKind, id: &ListenerId) -> bool {
        self.record(MockCall::Unsubscribe(kind));
        self.listeners.remove(kind, id)
    }
}

/// Call recorded by [`MockGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    BookSession {
        tutor: Address,
        duration_seconds: u64,
        value: Wei,
    },
    ListAsTutor {
        name: String,
        rate_per_hour: Wei,
    },
    CompleteSession {
        session_id: SessionId,
        rating: u8,
    },
    GetTutorDetails(Address),
    GetSession(SessionId),
    GetUserSessions(Address),
}

/// In-memory contract gateway.
#[derive(Default)]
pub struct MockGateway {
    tutors: Mutex<HashMap<Address, TutorRecord>>,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    user_sessions: Mutex<HashMap<Address, Vec<SessionId>>>,
    failure: Mutex<Option<GatewayError>>,
    calls: Mutex<Vec<GatewayCall>>,
    next_block: Mutex<u64>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tutor(&self, address: Address, record: TutorRecord) {
        self.tutors.lock().unwrap().insert(address, record);
    }

    pub fn add_session(&self, user: &Address, id: SessionId, record: SessionRecord) {
        self.sessions.lock().unwrap().insert(id, record);
        self.user_sessions
            .lock()
            .unwrap()
            .entry(*user)
            .or_default()
            .push(id);
    }

    /// Make every subsequent call fail with `error`.
    pub fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    fn begin(&self, call: GatewayCall) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn receipt(&self) -> TransactionReceipt {
        let mut block = self.next_block.lock().unwrap();
        *block += 1;
        TransactionReceipt {
            transaction_hash: TxHash::left_padding_from(&block.to_be_bytes()),
            block_number: *block,
            gas_used: 21_000,
            success: true,
        }
    }
}

#[async_trait]
impl ContractGateway for MockGateway {
    async fn book_session(
        &self,
        tutor: &Address,
        duration_seconds: u64,
        value: Wei,
    ) -> Result<TransactionReceipt, GatewayError> {
        self.begin(GatewayCall::BookSession {
            tutor: *tutor,
            duration_seconds,
            value,
        })?;
        Ok(self.receipt())
    }

    async fn list_as_tutor(
        &self,
        name: &str,
        rate_per_hour: Wei,
    ) -> Result<TransactionReceipt, GatewayError> {
        self.begin(GatewayCall::ListAsTutor {
            name: name.to_string(),
            rate_per_hour,
        })?;
        Ok(self.receipt())
    }

    async fn complete_session(
        &self,
        session_id: SessionId,
        rating: Rating,
    ) -> Result<TransactionReceipt, GatewayError> {
        self.begin(GatewayCall::CompleteSession {
            session_id,
            rating: rating.value(),
        })?;
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            session.rating = rating.value();
        }
        Ok(self.receipt())
    }

    async fn get_tutor_details(&self, tutor: &Address) -> Result<TutorRecord, GatewayError> {
        self.begin(GatewayCall::GetTutorDetails(*tutor))?;
        // unknown tutors read as the contract's zero value
        Ok(self
            .tutors
            .lock()
            .unwrap()
            .get(tutor)
            .cloned()
            .unwrap_or(TutorRecord {
                name: String::new(),
                rate_per_hour: Wei::ZERO,
                is_listed: false,
                total_sessions: 0,
                total_rating: 0,
                is_verified: false,
            }))
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionRecord, GatewayError> {
        self.begin(GatewayCall::GetSession(session_id))?;
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or(SessionRecord {
                rating: 0,
                duration: 0,
                timestamp: 0,
            }))
    }

    async fn get_user_sessions(&self, user: &Address) -> Result<Vec<SessionId>, GatewayError> {
        self.begin(GatewayCall::GetUserSessions(*user))?;
        Ok(self
            .user_sessions
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .unwrap_or_default())
    }
}

type Reply = Result<Value, RpcError>;

/// Scripted JSON-RPC endpoint.
///
/// Replies are looked up per method: queued one-shot replies first, then the
/// standing reply. Methods with neither fail with `-32601`, the way a node
/// answers a method it does not implement.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    standing: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `method` request with `result` from now on.
    pub fn respond(&self, method: &str, result: Value) {
        self.standing.lock().unwrap().insert(method.to_string(), Ok(result));
    }

    /// Answer the next `method` request with `result`, ahead of the standing reply.
    pub fn respond_once(&self, method: &str, result: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(result));
    }

    /// Fail every `method` request with `error` from now on.
    pub fn fail(&self, method: &str, error: RpcError) {
        self.standing.lock().unwrap().insert(method.to_string(), Err(error));
    }

    /// Every request so far as `(method, params)`.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    /// Params of every `method` request so far.
    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }
        self.standing
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_else(|| {
                Err(RpcError::Rpc {
                    code: METHOD_NOT_FOUND_CODE,
                    message: format!("the method {} does not exist/is not available", method),
                })
            })
    }
}
