//! MarketplaceContext - the application root.
//!
//! Owns the provider, the contract gateway, the event bus, and the current
//! [`WalletSession`] with its [`Marketplace`]. Front ends (the CLI today)
//! hold a clone of the context and ask it for the current session instead of
//! keeping their own.
//!
//! ## Restart
//!
//! A network switch invalidates the contract/provider pairing. The session
//! raises its restart signal; [`MarketplaceContext::restart`] answers it by
//! tearing the old session down, dropping derived caches, and installing a
//! fresh unconnected session.
//!
//! ```text
//!   chainChanged ──► WalletSession ──restart signal──► MarketplaceContext
//!                                                        │
//!                                  teardown + clear cache│
//!                                                        ▼
//!                                             new WalletSession (unconnected)
//! ```

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::json;

use crate::event_bus::EventBus;
use crate::gateway::ContractGateway;
use crate::marketplace::Marketplace;
use crate::provider::WalletProvider;
use crate::wallet::WalletSession;

/// Event published after the context has installed a fresh session.
pub const RESTARTED: &str = "app:restarted";

pub struct MarketplaceContextBuilder {
    gateway: Arc<dyn ContractGateway>,
    provider: Option<Arc<dyn WalletProvider>>,
    event_bus: Option<Arc<EventBus>>,
    config_dir: Option<PathBuf>,
}

impl MarketplaceContextBuilder {
    pub fn new(gateway: Arc<dyn ContractGateway>) -> Self {
        Self {
            gateway,
            provider: None,
            event_bus: None,
            config_dir: None,
        }
    }

    /// Wallet provider. Without one every connect fails with
    /// `ProviderUnavailable`.
    pub fn provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use an existing EventBus (for testing or custom configurations).
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config_dir(mut self, dir: PathBuf) -> Self {
        self.config_dir = Some(dir);
        self
    }

    pub fn build(self) -> MarketplaceContext {
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let marketplace = new_marketplace(&self.provider, &self.gateway, &event_bus);

        MarketplaceContext {
            event_bus,
            provider: self.provider,
            gateway: self.gateway,
            marketplace: Arc::new(RwLock::new(marketplace)),
            config_dir: self.config_dir,
        }
    }
}

fn new_marketplace(
    provider: &Option<Arc<dyn WalletProvider>>,
    gateway: &Arc<dyn ContractGateway>,
    event_bus: &Arc<EventBus>,
) -> Arc<Marketplace> {
    let session = WalletSession::new(provider.clone(), Arc::clone(event_bus));
    Arc::new(Marketplace::new(session, Arc::clone(gateway)))
}

/// Shared application state. Cloning shares the same session.
#[derive(Clone)]
pub struct MarketplaceContext {
    pub event_bus: Arc<EventBus>,
    provider: Option<Arc<dyn WalletProvider>>,
    gateway: Arc<dyn ContractGateway>,
    marketplace: Arc<RwLock<Arc<Marketplace>>>,
    config_dir: Option<PathBuf>,
}

impl MarketplaceContext {
    pub fn builder(gateway: Arc<dyn ContractGateway>) -> MarketplaceContextBuilder {
        MarketplaceContextBuilder::new(gateway)
    }

    /// The current marketplace. Replaced on restart.
    pub fn marketplace(&self) -> Arc<Marketplace> {
        Arc::clone(&self.marketplace.read().unwrap())
    }

    /// The current wallet session. Replaced on restart.
    pub fn session(&self) -> Arc<WalletSession> {
        Arc::clone(self.marketplace().session())
    }

    pub fn gateway(&self) -> &Arc<dyn ContractGateway> {
        &self.gateway
    }

    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_dir.clone()
    }

    /// Discard the current session and start over unconnected.
    ///
    /// The old session's provider handlers are removed and the tutor profile
    /// cache is dropped. Handles to the old session still work but no longer
    /// receive notifications.
    pub fn restart(&self) -> Arc<WalletSession> {
        let fresh = new_marketplace(&self.provider, &self.gateway, &self.event_bus);
        let old = std::mem::replace(&mut *self.marketplace.write().unwrap(), Arc::clone(&fresh));

        old.session().teardown();
        old.clear_cache();
        log::info!("Restarted with a fresh wallet session");
        self.event_bus.emit(RESTARTED, &json!({}));
        Arc::clone(fresh.session())
    }

    /// Wait for the current session to request a restart, then perform it.
    ///
    /// Returns `None` if the session went away without asking.
    pub async fn restart_when_requested(&self) -> Option<Arc<WalletSession>> {
        let mut signal = self.session().restart_signal();
        loop {
            if *signal.borrow_and_update() {
                return Some(self.restart());
            }
            if signal.changed().await.is_err() {
                return None;
            }
        }
    }
}
