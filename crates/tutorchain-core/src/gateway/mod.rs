//! Contract gateway: the fixed call surface of the tutoring contract.
//!
//! The contract itself (registry, escrow, rating aggregation) is external.
//! Everything here is a pass-through; failures are reported to the caller
//! and never retried.

pub mod contract;
mod rpc_gateway;
pub mod types;

pub use rpc_gateway::{ReceiptPolling, RpcGateway};
pub use types::{Rating, SessionId, SessionRecord, TransactionReceipt, TutorRecord, TxHash};

use async_trait::async_trait;
use thiserror::Error;

use crate::provider::rpc::RpcError;
use crate::wallet::types::{Address, Wei};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Contract call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Could not decode contract data: {0}")]
    Decode(String),

    #[error("Contract value out of range: {0}")]
    OutOfRange(String),

    #[error("Transaction {0} reverted")]
    Reverted(TxHash),

    #[error("Transaction {0} was not mined in time")]
    ReceiptTimeout(TxHash),

    #[error("No account available to send the transaction")]
    NoSender,

    #[error("Invalid rating: {0}")]
    InvalidRating(u8),
}

impl From<alloy_sol_types::Error> for GatewayError {
    fn from(e: alloy_sol_types::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

/// The tutoring contract's call surface.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    /// Book `duration_seconds` with `tutor`, paying `value` into escrow.
    /// Resolves once the transaction is mined.
    async fn book_session(
        &self,
        tutor: &Address,
        duration_seconds: u64,
        value: Wei,
    ) -> Result<TransactionReceipt, GatewayError>;

    /// List the caller as a tutor.
    async fn list_as_tutor(
        &self,
        name: &str,
        rate_per_hour: Wei,
    ) -> Result<TransactionReceipt, GatewayError>;

    /// Complete a session and record its rating.
    async fn complete_session(
        &self,
        session_id: SessionId,
        rating: Rating,
    ) -> Result<TransactionReceipt, GatewayError>;

    async fn get_tutor_details(&self, tutor: &Address) -> Result<TutorRecord, GatewayError>;

    async fn get_session(&self, session_id: SessionId) -> Result<SessionRecord, GatewayError>;

    async fn get_user_sessions(&self, user: &Address) -> Result<Vec<SessionId>, GatewayError>;
}
