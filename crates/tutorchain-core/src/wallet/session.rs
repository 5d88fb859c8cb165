//! WalletSession - single source of truth for "connected, to whom, on which network".
//!
//! The session bridges the provider's push notifications into a pollable
//! [`WalletState`] snapshot. It is owned by the application root
//! ([`crate::context::MarketplaceContext`]) and handed out as `Arc`.
//!
//! Writers are `connect()` and the two notification handlers. Each one
//! replaces the whole state under a lock that is never held across an
//! `.await`, so readers always see a complete snapshot. Two overlapping
//! `connect()` calls are not de-duplicated: whichever finishes last commits
//! last. Callers should disable their connect control while
//! [`WalletSession::is_connecting`] is true.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::json;
use tokio::sync::watch;

use super::state::{ConnectionError, WalletState};
use super::types::{Address, ChainId};
use crate::event_bus::EventBus;
use crate::provider::{
    ListenerId, ProviderError, ProviderEventKind, ProviderNotification, WalletProvider,
};

/// Event types published on the [`EventBus`].
pub mod events {
    pub const CONNECTED: &str = "wallet:connected";
    pub const CONNECT_FAILED: &str = "wallet:connect_failed";
    pub const ACCOUNTS_CHANGED: &str = "wallet:accounts_changed";
    pub const CHAIN_CHANGED: &str = "wallet:chain_changed";
    pub const RESTART: &str = "wallet:restart";
}

impl From<ProviderError> for ConnectionError {
    fn from(e: ProviderError) -> Self {
        if e.is_user_rejection() {
            ConnectionError::UserRejected(e.message())
        } else {
            ConnectionError::Provider(e.message())
        }
    }
}

type ChangeListener = Arc<dyn Fn(&WalletState) + Send + Sync>;

/// Provider handler ids held while notifications are wired up.
struct Registration {
    accounts: ListenerId,
    chain: ListenerId,
}

pub struct WalletSession {
    provider: Option<Arc<dyn WalletProvider>>,
    event_bus: Arc<EventBus>,
    state: Mutex<WalletState>,
    registration: Mutex<Option<Registration>>,
    listeners: Mutex<HashMap<u64, ChangeListener>>,
    next_listener: AtomicU64,
    pending: AtomicUsize,
    restart: watch::Sender<bool>,
}

impl WalletSession {
    /// Create an unconnected session. No provider call is made.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, event_bus: Arc<EventBus>) -> Arc<Self> {
        let (restart, _) = watch::channel(false);
        Arc::new(Self {
            provider,
            event_bus,
            state: Mutex::new(WalletState::new()),
            registration: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            pending: AtomicUsize::new(0),
            restart,
        })
    }

    /// Current state snapshot.
    pub fn state(&self) -> WalletState {
        self.state.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn account(&self) -> Option<Address> {
        self.state.lock().unwrap().account
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// True while at least one connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// True while the provider notification handlers are registered.
    pub fn handlers_registered(&self) -> bool {
        self.registration.lock().unwrap().is_some()
    }

    /// True once a network switch has asked the application to restart.
    pub fn restart_requested(&self) -> bool {
        *self.restart.borrow()
    }

    /// Receiver that flips to `true` when a network switch requires a restart.
    pub fn restart_signal(&self) -> watch::Receiver<bool> {
        self.restart.subscribe()
    }

    /// Connect to the wallet.
    ///
    /// Steps run strictly in order, each able to fail on its own: provider
    /// presence, account access (may wait on a user prompt indefinitely),
    /// network, signer address. Only after all four succeed is the new state
    /// committed. On failure the session is cleared, the network is kept,
    /// and the error is both stored and returned.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let _pending = PendingGuard::enter(&self.pending);
        self.update(|s| s.begin_attempt());

        match self.resolve().await {
            Ok((account, chain_id)) => {
                log::info!("Wallet connected: {} on chain {}", account, chain_id);
                let state = self.update(|_| WalletState::connected(account, chain_id));
                self.register_handlers();
                self.event_bus.emit(events::CONNECTED, &state);
                Ok(())
            }
            Err(err) => {
                log::warn!("Wallet connection failed: {}", err);
                self.update(|s| s.after_failure(err.clone()));
                self.event_bus.emit(events::CONNECT_FAILED, &err);
                Err(err)
            }
        }
    }

    async fn resolve(&self) -> Result<(Address, ChainId), ConnectionError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(ConnectionError::ProviderUnavailable)?;

        let accounts = provider.request_accounts().await?;
        log::debug!("Provider returned {} account(s)", accounts.len());
        if accounts.is_empty() {
            return Err(ConnectionError::NoAccountsReturned);
        }

        let network = provider.get_network().await?;
        log::debug!("Provider network: chain {}", network.chain_id);

        let address = provider.signer_address().await?;
        Ok((address, network.chain_id))
    }

    /// Handle an `accountsChanged` notification.
    pub fn on_accounts_changed(&self, accounts: &[Address]) {
        log::info!("Accounts changed: {} account(s)", accounts.len());
        let state = self.update(|s| s.with_accounts(accounts));
        self.event_bus.emit(events::ACCOUNTS_CHANGED, &state);
    }

    /// Handle a `chainChanged` notification.
    ///
    /// The contract/provider pairing is not reusable across networks, so
    /// besides recording the new chain this raises the restart signal. The
    /// signal is a flag, so repeated notifications have the same effect.
    pub fn on_chain_changed(&self, chain_id: ChainId) {
        log::info!("Chain changed: {}", chain_id);
        let state = self.update(|s| s.with_chain(chain_id));
        self.event_bus.emit(events::CHAIN_CHANGED, &state);

        self.restart.send_replace(true);
        self.event_bus
            .emit(events::RESTART, &json!({ "chain_id": chain_id }));
    }

    /// Register a listener called with every new state.
    ///
    /// The listener stays registered until the returned handle is dropped or
    /// [`ChangeSubscription::unsubscribe`] is called.
    pub fn on_change<F>(self: &Arc<Self>, listener: F) -> ChangeSubscription
    where
        F: Fn(&WalletState) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().insert(id, Arc::new(listener));
        ChangeSubscription {
            session: Arc::downgrade(self),
            id,
        }
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Unregister the provider notification handlers. Safe to call repeatedly.
    pub fn teardown(&self) {
        let registration = self.registration.lock().unwrap().take();
        if let (Some(provider), Some(registration)) = (&self.provider, registration) {
            provider.unsubscribe(ProviderEventKind::AccountsChanged, &registration.accounts);
            provider.unsubscribe(ProviderEventKind::ChainChanged, &registration.chain);
            log::debug!("Wallet notification handlers removed");
        }
    }

    /// Wire provider notifications to the handlers, at most once.
    fn register_handlers(self: &Arc<Self>) {
        let Some(provider) = &self.provider else {
            return;
        };
        let mut registration = self.registration.lock().unwrap();
        if registration.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let accounts = provider.subscribe(
            ProviderEventKind::AccountsChanged,
            Arc::new(move |notification| {
                if let (Some(session), ProviderNotification::AccountsChanged(accounts)) =
                    (weak.upgrade(), notification)
                {
                    session.on_accounts_changed(accounts);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        let chain = provider.subscribe(
            ProviderEventKind::ChainChanged,
            Arc::new(move |notification| {
                if let (Some(session), ProviderNotification::ChainChanged(chain_id)) =
                    (weak.upgrade(), notification)
                {
                    session.on_chain_changed(*chain_id);
                }
            }),
        );

        *registration = Some(Registration { accounts, chain });
        log::debug!("Wallet notification handlers registered");
    }

    /// Swap in a new state and notify listeners if it differs.
    fn update(&self, transition: impl FnOnce(&WalletState) -> WalletState) -> WalletState {
        let (next, changed) = {
            let mut state = self.state.lock().unwrap();
            let next = transition(&state);
            let changed = *state != next;
            *state = next.clone();
            (next, changed)
        };
        debug_assert!(next.is_consistent(), "inconsistent wallet state: {:?}", next);

        if changed {
            let listeners: Vec<ChangeListener> =
                self.listeners.lock().unwrap().values().cloned().collect();
            for listener in listeners {
                listener(&next);
            }
        }
        next
    }

    fn remove_listener(&self, id: u64) -> bool {
        self.listeners.lock().unwrap().remove(&id).is_some()
    }
}

impl Drop for WalletSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Counts an in-flight connect attempt for as long as it lives.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Unsubscribe handle returned by [`WalletSession::on_change`].
#[must_use = "dropping the subscription unregisters the listener"]
pub struct ChangeSubscription {
    session: Weak<WalletSession>,
    id: u64,
}

impl ChangeSubscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {}

    /// Keep the listener for the rest of the session's life.
    pub fn detach(mut self) {
        self.session = Weak::new();
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.remove_listener(self.id);
        }
    }
}
