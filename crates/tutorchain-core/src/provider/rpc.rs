//! Minimal JSON-RPC 2.0 client over HTTP.
//!
//! `ureq` is blocking, so async callers go through [`RpcClient::request`],
//! which moves the call onto tokio's blocking pool.
//!
//! The provider and the gateway depend on [`RpcTransport`] rather than on the
//! client directly, so tests can script replies without a node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::logging::{log_line, LogHandle};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("{message} (code {code})")]
    Rpc { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid JSON-RPC response: {0}")]
    InvalidResponse(String),
}

/// Something that answers JSON-RPC requests.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

struct Inner {
    url: String,
    agent: ureq::Agent,
    next_id: AtomicU64,
    wire_log: LogHandle,
}

/// Cheaply clonable JSON-RPC client bound to one endpoint.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, wire_log: LogHandle) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                agent: ureq::Agent::new(),
                next_id: AtomicU64::new(1),
                wire_log,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Issue a request without blocking the async runtime.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let client = self.clone();
        let method = method.to_string();
        tokio::task::spawn_blocking(move || client.request_blocking(&method, params))
            .await
            .map_err(|e| RpcError::Transport(format!("request task failed: {}", e)))?
    }

    /// Issue a request on the current thread.
    pub fn request_blocking(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        log_line(&self.inner.wire_log, "SEND", &body.to_string());
        log::debug!("JSON-RPC {} -> {} (id {})", method, self.inner.url, id);

        let reply: Value = match self.inner.agent.post(&self.inner.url).send_json(body) {
            Ok(response) => response
                .into_json()
                .map_err(|e| RpcError::InvalidResponse(e.to_string()))?,
            // Some nodes send JSON-RPC errors with a non-2xx status.
            Err(ureq::Error::Status(code, response)) => match response.into_json::<Value>() {
                Ok(value) if value.get("error").is_some() => value,
                _ => return Err(RpcError::Transport(format!("HTTP status {}", code))),
            },
            Err(e) => return Err(RpcError::Transport(e.to_string())),
        };
        log_line(&self.inner.wire_log, "RECV", &reply.to_string());

        parse_reply(reply)
    }
}

/// Extract the result of a JSON-RPC reply, or its error object.
pub fn parse_reply(reply: Value) -> Result<Value, RpcError> {
    if let Some(error) = reply.get("error") {
        if !error.is_null() {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }
    }

    match reply {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| RpcError::InvalidResponse("missing result".to_string())),
        other => Err(RpcError::InvalidResponse(format!(
            "expected object, got {}",
            other
        ))),
    }
}

/// Deserialize a JSON-RPC result into its typed form.
pub fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))
}

#[async_trait]
impl RpcTransport for RpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        RpcClient::request(self, method, params).await
    }
}
