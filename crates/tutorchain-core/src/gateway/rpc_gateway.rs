//! ContractGateway over JSON-RPC: `eth_call` for reads, `eth_sendTransaction`
//! plus receipt polling for writes.
//!
//! Transactions are sent from the endpoint's first account, the same account
//! the wallet session resolves as its signer.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Bytes, U256, U64};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::contract::ITutorMarketplace;
use super::types::{Rating, SessionId, SessionRecord, TransactionReceipt, TutorRecord, TxHash};
use super::{ContractGateway, GatewayError};
use crate::provider::rpc::{decode_result, RpcError, RpcTransport};
use crate::wallet::types::{Address, Wei};

/// How long to wait for a transaction to be mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolling {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            attempts: 120,
            interval: Duration::from_secs(1),
        }
    }
}

/// `eth_sendTransaction` parameters. Gas and nonce are left to the node.
#[derive(Debug, Serialize)]
struct TransactionRequest {
    from: Address,
    to: Address,
    data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<U256>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: TxHash,
    block_number: U64,
    #[serde(default)]
    gas_used: Option<U64>,
    // pre-Byzantium receipts have no status; treat them as successful
    #[serde(default)]
    status: Option<U64>,
}

impl From<RawReceipt> for TransactionReceipt {
    fn from(raw: RawReceipt) -> Self {
        TransactionReceipt {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.to::<u64>(),
            gas_used: raw.gas_used.map(|gas| gas.to::<u64>()).unwrap_or(0),
            success: raw.status.map_or(true, |status| status == U64::from(1)),
        }
    }
}

pub struct RpcGateway {
    transport: Arc<dyn RpcTransport>,
    contract: Address,
    polling: ReceiptPolling,
}

impl RpcGateway {
    pub fn new(transport: Arc<dyn RpcTransport>, contract: Address, polling: ReceiptPolling) -> Self {
        Self {
            transport,
            contract,
            polling,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    async fn call<C: SolCall>(&self, call: C) -> Result<C::Return, GatewayError> {
        let data = Bytes::from(call.abi_encode());
        let result = self
            .transport
            .request(
                "eth_call",
                json!([{ "to": self.contract, "data": data }, "latest"]),
            )
            .await?;
        let output: Bytes = decode_result("eth_call", result)?;
        Ok(C::abi_decode_returns(&output, true)?)
    }

    async fn sender(&self) -> Result<Address, GatewayError> {
        let accounts = self.transport.request("eth_accounts", json!([])).await?;
        let accounts: Vec<Address> = decode_result("eth_accounts", accounts)?;
        accounts.into_iter().next().ok_or(GatewayError::NoSender)
    }

    async fn transact<C: SolCall>(&self, call: C, value: Wei) -> Result<TransactionReceipt, GatewayError> {
        let from = self.sender().await?;
        let tx = TransactionRequest {
            from,
            to: self.contract,
            data: Bytes::from(call.abi_encode()),
            value: (!value.is_zero()).then_some(value.0),
        };
        log::debug!("Sending {} to {}", C::SIGNATURE, self.contract);

        let hash = self.transport.request("eth_sendTransaction", json!([tx])).await?;
        let hash: TxHash = decode_result("eth_sendTransaction", hash)?;
        log::info!("Transaction {} sent from {}", hash, from);

        let receipt = self.wait_for_receipt(hash).await?;
        if !receipt.success {
            return Err(GatewayError::Reverted(hash));
        }
        log::info!("Transaction {} mined in block {}", hash, receipt.block_number);
        Ok(receipt)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TransactionReceipt, GatewayError> {
        for attempt in 0..self.polling.attempts {
            let value = self
                .transport
                .request("eth_getTransactionReceipt", json!([hash]))
                .await?;
            if !value.is_null() {
                let raw: RawReceipt = decode_result("eth_getTransactionReceipt", value)?;
                return Ok(raw.into());
            }
            log::debug!("Receipt for {} not ready (attempt {})", hash, attempt + 1);
            tokio::time::sleep(self.polling.interval).await;
        }
        Err(GatewayError::ReceiptTimeout(hash))
    }
}

/// Narrow a contract integer to the width the records use.
fn narrow<T: TryFrom<U256>>(field: &str, value: U256) -> Result<T, GatewayError> {
    T::try_from(value).map_err(|_| GatewayError::OutOfRange(format!("{} = {}", field, value)))
}

#[async_trait]
impl ContractGateway for RpcGateway {
    async fn book_session(
        &self,
        tutor: &Address,
        duration_seconds: u64,
        value: Wei,
    ) -> Result<TransactionReceipt, GatewayError> {
        let call = ITutorMarketplace::bookSessionCall {
            tutor: *tutor,
            duration: U256::from(duration_seconds),
        };
        self.transact(call, value).await
    }

    async fn list_as_tutor(
        &self,
        name: &str,
        rate_per_hour: Wei,
    ) -> Result<TransactionReceipt, GatewayError> {
        let call = ITutorMarketplace::listTutorCall {
            name: name.to_string(),
            ratePerHour: rate_per_hour.0,
        };
        self.transact(call, Wei::ZERO).await
    }

    async fn complete_session(
        &self,
        session_id: SessionId,
        rating: Rating,
    ) -> Result<TransactionReceipt, GatewayError> {
        let call = ITutorMarketplace::completeSessionCall {
            sessionId: U256::from(session_id),
            rating: U256::from(rating.value()),
        };
        self.transact(call, Wei::ZERO).await
    }

    async fn get_tutor_details(&self, tutor: &Address) -> Result<TutorRecord, GatewayError> {
        let tutor = self
            .call(ITutorMarketplace::tutorsCall { tutor: *tutor })
            .await?;
        Ok(TutorRecord {
            name: tutor.name,
            rate_per_hour: Wei(tutor.ratePerHour),
            is_listed: tutor.isListed,
            total_sessions: narrow("totalSessions", tutor.totalSessions)?,
            total_rating: narrow("totalRating", tutor.totalRating)?,
            is_verified: tutor.isVerified,
        })
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionRecord, GatewayError> {
        let session = self
            .call(ITutorMarketplace::sessionsCall {
                sessionId: U256::from(session_id),
            })
            .await?;
        Ok(SessionRecord {
            rating: narrow("rating", session.rating)?,
            duration: narrow("duration", session.duration)?,
            timestamp: narrow("timestamp", session.timestamp)?,
        })
    }

    async fn get_user_sessions(&self, user: &Address) -> Result<Vec<SessionId>, GatewayError> {
        let sessions = self
            .call(ITutorMarketplace::getUserSessionsCall { user: *user })
            .await?;
        sessions
            .ids
            .into_iter()
            .map(|id| narrow("sessionId", id))
            .collect()
    }
}
