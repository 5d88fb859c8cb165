//! # tutorchain-core
//!
//! Core logic for tutorchain, a peer-tutoring marketplace on an EVM
//! contract.
//!
//! This crate is front-end agnostic and is used by the `tutorchain` CLI.
//!
//! ## Key Concepts
//!
//! - **WalletSession**: the single source of truth for whether a wallet is
//!   connected, which account, and which network
//! - **WalletProvider**: the host capability that holds keys and pushes
//!   account/network notifications
//! - **ContractGateway**: the tutoring contract's call surface
//! - **MarketplaceContext**: the application root that owns the session and
//!   replaces it when the network changes

pub mod config;
pub mod context;
pub mod event_bus;
pub mod gateway;
pub mod logging;
pub mod marketplace;
pub mod paths;
pub mod provider;
pub mod testing;
pub mod view;
pub mod wallet;

// Re-export commonly used types
pub use config::TutorchainConfig;
pub use context::MarketplaceContext;
pub use gateway::{ContractGateway, GatewayError};
pub use marketplace::{Marketplace, MarketplaceError};
pub use provider::{ProviderError, WalletProvider};
pub use wallet::{Address, ChainId, ConnectionError, WalletSession, WalletState, Wei, U256};
