// Broadcaster variants: direct JSON-RPC submission, or a private-mempool
// relay bundle with a target inclusion block. The broadcaster is stateless;
// retry policy belongs to the caller.

use std::sync::Arc;

use alloy::primitives::{hex, B256};
use serde_json::json;
use tracing::{info, warn};

use crate::chain::txn::{raw_tx_hash, TxnSigner};
use crate::chain::ChainApi;
use crate::error::ChainError;
use crate::types::SubmissionStatus;

#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub status: SubmissionStatus,
    pub tx_hash: Option<B256>,
}

#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, raw_tx: &[u8], target_block: u64)
        -> Result<BroadcastOutcome, ChainError>;
}

/// Submits through a public JSON-RPC endpoint; used for dev and fork runs.
pub struct DirectBroadcaster {
    chain: Arc<dyn ChainApi>,
}

impl DirectBroadcaster {
    pub fn new(chain: Arc<dyn ChainApi>) -> Self {
        Self { chain }
    }
}

#[async_trait::async_trait]
impl Broadcaster for DirectBroadcaster {
    async fn broadcast(
        &self,
        raw_tx: &[u8],
        _target_block: u64,
    ) -> Result<BroadcastOutcome, ChainError> {
        let tx_hash = self.chain.send_raw_transaction(raw_tx).await?;
        info!("Broadcast transaction {}", tx_hash);
        Ok(BroadcastOutcome { status: SubmissionStatus::Sent, tx_hash: Some(tx_hash) })
    }
}

/// Submits a single-transaction bundle to a private relay targeting a
/// specific block. The relay simulates the bundle and either includes it or
/// drops it silently; a simulation rejection comes back as a Dropped
/// outcome, not an error.
pub struct RelayBroadcaster {
    http: reqwest::Client,
    relay_url: String,
    auth_signer: TxnSigner,
}

impl RelayBroadcaster {
    pub fn new(relay_url: impl Into<String>, auth_signer: TxnSigner) -> Self {
        Self { http: reqwest::Client::new(), relay_url: relay_url.into(), auth_signer }
    }
}

#[async_trait::async_trait]
impl Broadcaster for RelayBroadcaster {
    async fn broadcast(
        &self,
        raw_tx: &[u8],
        target_block: u64,
    ) -> Result<BroadcastOutcome, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendBundle",
            "params": [{
                "txs": [format!("0x{}", hex::encode(raw_tx))],
                "blockNumber": format!("{:#x}", target_block),
            }],
        })
        .to_string();

        let signature = self
            .auth_signer
            .relay_signature(&body)
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let response = self
            .http
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if let Some(err) = payload.get("error") {
            warn!(
                "Relay rejected bundle for block {}: {}",
                target_block,
                err.get("message").and_then(|m| m.as_str()).unwrap_or("unknown")
            );
            return Ok(BroadcastOutcome { status: SubmissionStatus::Dropped, tx_hash: None });
        }

        let tx_hash = raw_tx_hash(raw_tx);
        info!("Bundle accepted for block {} ({})", target_block, tx_hash);
        Ok(BroadcastOutcome { status: SubmissionStatus::Sent, tx_hash: Some(tx_hash) })
    }
}
