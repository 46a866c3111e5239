//! Rollapp (EVM) chain access: the queries verification needs plus raw
//! pass-through forwarding.

use crate::jsonrpc;
use alloy_primitives::Address;
use async_trait::async_trait;
use axum::body::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::metrics::METRICS;

/// Upstream reply relayed unmodified to the caller.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: u16,
    pub body: Bytes,
}

#[async_trait]
pub trait RollappChain: Send + Sync {
    /// The rollapp's current chain id.
    async fn chain_id(&self) -> Result<u64, crate::Error>;

    /// Nonce of the next transaction `address` may send (pending state).
    async fn pending_nonce(&self, address: Address) -> Result<u64, crate::Error>;

    /// Post `body` verbatim to the rollapp RPC.
    async fn forward_raw(&self, body: Bytes) -> Result<ForwardedResponse, crate::Error>;
}

/// JSON-RPC over HTTP.
pub struct HttpRollappClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRollappClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, url))
    }

    /// Share an existing connection pool.
    pub fn with_client(http: reqwest::Client, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, crate::Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = jsonrpc::Request::new(method, params, id);

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.rpc_error(method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.rpc_error(method, format!("HTTP {status}")));
        }

        let reply: jsonrpc::Response = response
            .json()
            .await
            .map_err(|e| self.rpc_error(method, format!("parse error: {e}")))?;

        if let Some(err) = reply.error {
            return Err(self.rpc_error(method, format!("{} ({})", err.message, err.code)));
        }
        let result = reply
            .result
            .ok_or_else(|| self.rpc_error(method, "missing result"))?;
        serde_json::from_value(result).map_err(|e| self.rpc_error(method, format!("bad result: {e}")))
    }

    fn rpc_error(&self, method: &str, e: impl std::fmt::Display) -> crate::Error {
        METRICS.chain_rpc_errors.fetch_add(1, Ordering::Relaxed);
        crate::Error::Rpc(format!("rollapp {method} failed: {e}"))
    }
}

#[async_trait]
impl RollappChain for HttpRollappClient {
    async fn chain_id(&self) -> Result<u64, crate::Error> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, crate::Error> {
        let raw: String = self
            .call("eth_getTransactionCount", nonce_params(address))
            .await?;
        parse_quantity(&raw)
    }

    async fn forward_raw(&self, body: Bytes) -> Result<ForwardedResponse, crate::Error> {
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| crate::Error::Gateway(format!("forward failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| crate::Error::Gateway(format!("forward read failed: {e}")))?;
        debug!(status, len = body.len(), "Forwarded to rollapp");
        Ok(ForwardedResponse { status, body })
    }
}

/// `eth_getTransactionCount` params for the pending state.
fn nonce_params(address: Address) -> Value {
    json!([address.to_string(), "pending"])
}

/// Parse an EVM hex quantity (`0x1a`).
pub fn parse_quantity(raw: &str) -> Result<u64, crate::Error> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| crate::Error::Rpc(format!("not a hex quantity: {raw}")))?;
    if digits.is_empty() {
        return Err(crate::Error::Rpc(format!("not a hex quantity: {raw}")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| crate::Error::Rpc(format!("bad hex quantity {raw}: {e}")))
}
