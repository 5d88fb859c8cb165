//! Wallet connection lifecycle.
//!
//! - [`types`]: addresses, chain ids and wei amounts
//! - [`state`]: the immutable [`WalletState`] snapshot and its transitions
//! - [`session`]: [`WalletSession`], which owns the snapshot and bridges
//!   provider notifications into it

pub mod session;
pub mod state;
pub mod types;

pub use session::{events, ChangeSubscription, WalletSession};
pub use state::{ConnectionError, WalletState};
pub use types::{Address, AmountError, ChainId, Wei, U256};
