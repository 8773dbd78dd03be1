// EVM JSON-RPC client. Transient failures retry with backoff; the ChainApi
// trait fronts the client so tests can stub the chain.

pub mod broadcaster;
pub mod txn;

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{hex, keccak256, Address, B256, U256};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ChainError;

const MAX_ATTEMPTS: usize = 3;

#[async_trait::async_trait]
pub trait ChainApi: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;
    async fn gas_price(&self) -> Result<U256, ChainError>;
    /// The exchange's cancellation watermark for an account: order nonces at
    /// or below it are cancelled en masse.
    async fn user_min_order_nonce(
        &self,
        exchange: Address,
        account: Address,
    ) -> Result<u64, ChainError>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;
}

pub struct EvmRpcClient {
    http: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl EvmRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            request_id: AtomicU64::new(1),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            match self.request_once(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < MAX_ATTEMPTS => {
                    warn!(
                        "Transient rpc failure for {} (attempt {} of {}): {}",
                        method, attempts, MAX_ATTEMPTS, e
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempts as u64))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        debug!("rpc request: {}", method);

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if let Some(err) = payload.get("error") {
            return Err(ChainError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::MalformedResponse("missing result".to_string()))
    }

    fn parse_quantity(value: &Value) -> Result<U256, ChainError> {
        let text = value
            .as_str()
            .ok_or_else(|| ChainError::MalformedResponse("quantity is not a string".to_string()))?;
        U256::from_str_radix(text.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::MalformedResponse(format!("bad quantity {}: {}", text, e)))
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Calldata for userMinOrderNonce(address).
fn user_min_order_nonce_calldata(account: Address) -> String {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&selector("userMinOrderNonce(address)"));
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(account.as_slice());
    format!("0x{}", hex::encode(data))
}

#[async_trait::async_trait]
impl ChainApi for EvmRpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        Ok(Self::parse_quantity(&result)?.saturating_to())
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        Self::parse_quantity(&result)
    }

    async fn user_min_order_nonce(
        &self,
        exchange: Address,
        account: Address,
    ) -> Result<u64, ChainError> {
        let call = json!([
            {
                "to": format!("0x{}", hex::encode(exchange)),
                "data": user_min_order_nonce_calldata(account),
            },
            "latest",
        ]);
        let result = self.request("eth_call", call).await?;
        Ok(Self::parse_quantity(&result)?.saturating_to())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        let result = self
            .request("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| ChainError::MalformedResponse("tx hash is not a string".to_string()))?;
        text.parse()
            .map_err(|e| ChainError::MalformedResponse(format!("bad tx hash {}: {}", text, e)))
    }
}
