// Execution engine: convert proposed matches into signed transactions and
// submit them, at most one in-flight transaction per nonce.

pub mod builders;

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::chain::broadcaster::Broadcaster;
use crate::chain::txn::TxnSigner;
use crate::chain::ChainApi;
use crate::error::ExecutionError;
use crate::marketplace::{MarketplaceRegistry, TxnData};
use crate::nonce::NonceProvider;
use crate::storage::OrderbookStorage;
use crate::types::{Order, OrderMatch, OrderStatus, Submission, SubmissionStatus};

/// Bundles target the block after next, leaving one block of relay slack.
pub const TARGET_BLOCK_OFFSET: u64 = 2;

const DEFAULT_GAS_LIMIT: u64 = 1_000_000;
const BATCH_SIZE: usize = 10;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

pub struct ExecutionEngine {
    storage: Arc<OrderbookStorage>,
    chain: Arc<dyn ChainApi>,
    broadcaster: Arc<dyn Broadcaster>,
    registry: Arc<MarketplaceRegistry>,
    nonce_provider: Arc<NonceProvider>,
    signer: Arc<TxnSigner>,
    gas_limit: u64,
}

struct PreparedMatch {
    mtch: OrderMatch,
    listing: Order,
    offer: Order,
    txn: TxnData,
}

impl ExecutionEngine {
    pub fn new(
        storage: Arc<OrderbookStorage>,
        chain: Arc<dyn ChainApi>,
        broadcaster: Arc<dyn Broadcaster>,
        registry: Arc<MarketplaceRegistry>,
        nonce_provider: Arc<NonceProvider>,
        signer: Arc<TxnSigner>,
    ) -> Self {
        Self {
            storage,
            chain,
            broadcaster,
            registry,
            nonce_provider,
            signer,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }

    /// Execute a batch of proposed matches, best gas budget first. Matches
    /// whose parents changed status, whose builders reject, or whose order
    /// nonces sit at or below the cancellation watermark are skipped without
    /// consuming a transaction nonce.
    pub async fn execute_matches(&self, mut matches: Vec<OrderMatch>) -> Result<Vec<Submission>> {
        matches.sort_by(|a, b| b.max_gas_price_eth.total_cmp(&a.max_gas_price_eth));

        // Resolve parents and builders up front; only viable matches go on
        // to consume nonces.
        let mut prepared = Vec::new();
        for mtch in matches {
            match self.prepare(&mtch).await {
                Ok(Some(p)) => prepared.push(p),
                Ok(None) => {}
                Err(e) => {
                    error!("Match {} rejected: {}", mtch.id, e);
                }
            }
        }
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        // Cancellation watermarks, one query per (exchange, signer).
        let mut watermarks: HashMap<(Address, Address), u64> = HashMap::new();
        for p in &prepared {
            for order in [&p.listing, &p.offer] {
                let key = (p.txn.to, order.signer);
                if !watermarks.contains_key(&key) {
                    let watermark = self.chain.user_min_order_nonce(key.0, key.1).await?;
                    watermarks.insert(key, watermark);
                }
            }
        }

        let gas_price: u128 = self.chain.gas_price().await?.saturating_to();
        let mut submissions = Vec::new();

        'matches: for p in prepared {
            for order in [&p.listing, &p.offer] {
                let watermark = watermarks[&(p.txn.to, order.signer)];
                if order.nonce <= watermark {
                    debug!(
                        "Discarding match {}: order {} nonce {} at or below watermark {}",
                        p.mtch.id, order.id, order.nonce, watermark
                    );
                    continue 'matches;
                }
            }

            let nonce = self.nonce_provider.get_nonce().await.map_err(anyhow::Error::from)?;
            let raw = match self.signer.sign_call(
                nonce,
                p.txn.to,
                p.txn.data.clone(),
                p.txn.value,
                self.gas_limit,
                gas_price.saturating_mul(2),
                gas_price / 10,
            ) {
                Ok(raw) => raw,
                Err(e) => {
                    // The nonce is burned; the next allocation is the next
                    // integer and this gap fails cheaply on-chain.
                    error!("Signing failed for match {}: {}", p.mtch.id, e);
                    continue;
                }
            };

            let target_block = self.chain.block_number().await? + TARGET_BLOCK_OFFSET;
            match self.broadcaster.broadcast(&raw, target_block).await {
                Ok(outcome) => {
                    let submission = Submission {
                        match_id: p.mtch.id.clone(),
                        status: outcome.status,
                        tx_hash: outcome.tx_hash.map(|h| h.to_string()),
                        nonce,
                        target_block,
                    };
                    match outcome.status {
                        SubmissionStatus::Sent => {
                            self.storage.mark_executed(&p.mtch, &p.listing, &p.offer).await?;
                            info!(
                                "Submitted match {} at nonce {} for block {}",
                                p.mtch.id, nonce, target_block
                            );
                        }
                        SubmissionStatus::Dropped => {
                            // Parents stay active and re-queueable; the
                            // consumed nonce is burned, never re-used.
                            warn!(
                                "Match {} dropped by relay at block {}; orders remain active",
                                p.mtch.id, target_block
                            );
                        }
                    }
                    submissions.push(submission);
                }
                Err(e) => {
                    warn!("Broadcast failed for match {}: {}", p.mtch.id, e);
                    submissions.push(Submission {
                        match_id: p.mtch.id.clone(),
                        status: SubmissionStatus::Dropped,
                        tx_hash: None,
                        nonce,
                        target_block,
                    });
                }
            }
        }

        Ok(submissions)
    }

    /// Load the match's parents and build its calldata. None means the match
    /// is stale (a parent left the active state) and was cleaned up already
    /// or will be by the cascade.
    async fn prepare(&self, mtch: &OrderMatch) -> Result<Option<PreparedMatch>, ExecutionError> {
        let listing = self.load_active(&mtch.listing_id).await;
        let offer = self.load_active(&mtch.offer_id).await;
        let (Some(listing), Some(offer)) = (listing, offer) else {
            debug!("Skipping stale match {}", mtch.id);
            return Ok(None);
        };

        let builder = self.registry.builder(listing.marketplace, listing.kind)?;
        let txn = builder.build(mtch, &listing, &offer)?;
        Ok(Some(PreparedMatch { mtch: mtch.clone(), listing, offer, txn }))
    }

    async fn load_active(&self, order_id: &str) -> Option<Order> {
        match self.storage.get_order(order_id).await {
            Ok(Some(order)) if order.status == OrderStatus::Active => Some(order),
            Ok(_) => None,
            Err(e) => {
                error!("Failed to load order {}: {}", order_id, e);
                None
            }
        }
    }

    /// Long-lived worker: drain proposed matches from the channel and
    /// execute them in batches, either when enough accumulate or on the
    /// flush tick.
    pub async fn run(&self, mut match_rx: mpsc::UnboundedReceiver<OrderMatch>) -> Result<()> {
        info!("Execution engine started");
        let mut flush_timer = interval(FLUSH_INTERVAL);
        let mut pending: Vec<OrderMatch> = Vec::new();

        loop {
            tokio::select! {
                mtch = match_rx.recv() => {
                    match mtch {
                        Some(mtch) => {
                            pending.push(mtch);
                            if pending.len() >= BATCH_SIZE {
                                self.drain(&mut pending).await;
                            }
                        }
                        None => {
                            self.drain(&mut pending).await;
                            info!("Match channel closed; execution engine stopping");
                            return Ok(());
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    if !pending.is_empty() {
                        self.drain(&mut pending).await;
                    }
                }
            }
        }
    }

    async fn drain(&self, pending: &mut Vec<OrderMatch>) {
        let batch: Vec<OrderMatch> = pending.drain(..).collect();
        let count = batch.len();
        match self.execute_matches(batch).await {
            Ok(submissions) => {
                let sent = submissions
                    .iter()
                    .filter(|s| s.status == SubmissionStatus::Sent)
                    .count();
                info!("Executed batch of {}: {} sent, {} dropped", count, sent, submissions.len() - sent);
            }
            Err(e) => {
                error!("Batch execution failed: {}", e);
            }
        }
    }
}

pub fn match_channel() -> (mpsc::UnboundedSender<OrderMatch>, mpsc::UnboundedReceiver<OrderMatch>) {
    mpsc::unbounded_channel()
}
