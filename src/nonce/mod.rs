// Nonce provider: monotone transaction-nonce allocation for one
// (account, exchange) pair under a single-writer distributed lease.

pub mod lease;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::chain::ChainApi;
use crate::error::NonceError;
use crate::nonce::lease::{LeaseLock, LEASE_TTL};
use crate::storage::keys::nonce_lock_key;
use crate::storage::{KvStore, NonceStore};
use crate::types::NonceRecord;

pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Acquiring,
    Running,
    Closed,
}

pub struct NonceProvider {
    kv: Arc<KvStore>,
    store: Arc<dyn NonceStore>,
    chain: Arc<dyn ChainApi>,
    chain_id: u64,
    account: Address,
    exchange: Address,
    state: RwLock<ProviderState>,
    lease: RwLock<Option<Arc<LeaseLock>>>,
    nonce: Mutex<u64>,
    save_tx: RwLock<Option<mpsc::UnboundedSender<u64>>>,
    debounce: Duration,
}

impl NonceProvider {
    pub fn new(
        kv: Arc<KvStore>,
        store: Arc<dyn NonceStore>,
        chain: Arc<dyn ChainApi>,
        chain_id: u64,
        account: Address,
        exchange: Address,
    ) -> Self {
        Self {
            kv,
            store,
            chain,
            chain_id,
            account,
            exchange,
            state: RwLock::new(ProviderState::Uninitialized),
            lease: RwLock::new(None),
            nonce: Mutex::new(0),
            save_tx: RwLock::new(None),
            debounce: SAVE_DEBOUNCE,
        }
    }

    /// Override the persistence debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub async fn state(&self) -> ProviderState {
        *self.state.read().await
    }

    /// Acquire the lease, load the effective starting nonce, and start the
    /// background persistence and lease-watch tasks. A closed provider
    /// cannot be re-run; build a fresh instance to re-elect.
    pub async fn run(self: &Arc<Self>) -> Result<(), NonceError> {
        {
            let mut state = self.state.write().await;
            if *state != ProviderState::Uninitialized {
                return Err(NonceError::Closed);
            }
            *state = ProviderState::Acquiring;
        }

        let lock_key = nonce_lock_key(&self.account, &self.exchange);
        let lease = match LeaseLock::try_acquire(self.kv.clone(), lock_key.clone(), LEASE_TTL)
            .await
        {
            Ok(Some(lease)) => Arc::new(lease),
            Ok(None) => {
                warn!("Nonce lease {} is held by another replica", lock_key);
                *self.state.write().await = ProviderState::Closed;
                return Err(NonceError::Contended);
            }
            Err(e) => {
                warn!("Nonce lease acquisition failed for {}: {}", lock_key, e);
                *self.state.write().await = ProviderState::Closed;
                return Err(NonceError::Closed);
            }
        };

        // Effective start is the greater of the persisted nonce and the
        // on-chain watermark; the watermark is an exclusive floor because
        // every allocation pre-increments.
        let persisted = self
            .store
            .get_nonce_record(&self.account, &self.exchange)
            .await
            .map(|r| r.map(|r| r.nonce_value()).unwrap_or(0))
            .unwrap_or_else(|e| {
                warn!("Failed to read persisted nonce: {}", e);
                0
            });
        let watermark = match self.chain.user_min_order_nonce(self.exchange, self.account).await {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!("Watermark query failed: {}", e);
                lease.release();
                *self.state.write().await = ProviderState::Closed;
                return Err(NonceError::Closed);
            }
        };
        let start = persisted.max(watermark);

        *self.nonce.lock().await = start;
        *self.lease.write().await = Some(lease.clone());
        *self.save_tx.write().await = Some(self.spawn_save_task());
        self.spawn_lease_watch(lease.watch());
        *self.state.write().await = ProviderState::Running;

        info!(
            "Nonce provider running for account {} exchange {} from nonce {} (persisted {}, watermark {})",
            self.account, self.exchange, start, persisted, watermark
        );
        Ok(())
    }

    /// Allocate the next nonce. Strictly sequential within the holder;
    /// fails fast once the lease is lost or the provider is closed.
    pub async fn get_nonce(&self) -> Result<u64, NonceError> {
        match *self.state.read().await {
            ProviderState::Running => {}
            ProviderState::Closed => return Err(NonceError::Closed),
            _ => return Err(NonceError::NotRunning),
        }
        let held = self
            .lease
            .read()
            .await
            .as_ref()
            .map(|l| l.is_held())
            .unwrap_or(false);
        if !held {
            self.close().await;
            return Err(NonceError::LeaseExpired);
        }

        let mut nonce = self.nonce.lock().await;
        *nonce += 1;
        let allocated = *nonce;
        drop(nonce);

        if let Some(tx) = self.save_tx.read().await.as_ref() {
            let _ = tx.send(allocated);
        }
        Ok(allocated)
    }

    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if *state == ProviderState::Closed {
            return;
        }
        *state = ProviderState::Closed;
        drop(state);

        if let Some(lease) = self.lease.write().await.take() {
            lease.release();
        }
        *self.save_tx.write().await = None;
        info!("Nonce provider closed for account {}", self.account);
    }

    /// Debounced persistence: each allocation re-arms a short timer and only
    /// the latest value is written. Save failures are logged, never blocking
    /// allocation — the in-memory copy stays authoritative under the lease.
    fn spawn_save_task(self: &Arc<Self>) -> mpsc::UnboundedSender<u64> {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let store = self.store.clone();
        let chain_id = self.chain_id;
        let account = self.account;
        let exchange = self.exchange;
        let debounce = self.debounce;

        tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(newer)) => latest = newer,
                        // Sender dropped mid-window: the unsaved tail is the
                        // at-most-one nonce the chain will reject on replay.
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                let record = NonceRecord {
                    chain_id,
                    match_executor_address: account,
                    exchange_address: exchange,
                    nonce: latest.to_string(),
                    updated_at: Utc::now(),
                    created_at: Utc::now(),
                };
                if let Err(e) = store.merge_nonce_record(&record).await {
                    warn!("Debounced nonce save failed: {}", e);
                }
            }
        });
        tx
    }

    fn spawn_lease_watch(self: &Arc<Self>, mut held_rx: tokio::sync::watch::Receiver<bool>) {
        let provider = self.clone();
        tokio::spawn(async move {
            while held_rx.changed().await.is_ok() {
                if !*held_rx.borrow() {
                    warn!("Lease lost; closing nonce provider for {}", provider.account);
                    provider.close().await;
                    return;
                }
            }
        });
    }
}
