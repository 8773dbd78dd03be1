// Distributed lease lock over the KV store: TTL'd acquire, auto-renewal,
// and a watch signal that flips when the lease is lost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::KvStore;

pub const LEASE_TTL: Duration = Duration::from_secs(15);

pub struct LeaseLock {
    kv: Arc<KvStore>,
    key: String,
    token: String,
    held_rx: watch::Receiver<bool>,
    renew_task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaseLock {
    /// Try to take the lease once. None means another holder owns it.
    /// On success a renewal task keeps the lease alive at a third of the
    /// TTL; a failed renewal flips the held signal and stops renewing.
    pub async fn try_acquire(
        kv: Arc<KvStore>,
        key: String,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let token = Uuid::new_v4().to_string();
        if !kv.lease_acquire(&key, &token, ttl)? {
            return Ok(None);
        }
        debug!("Acquired lease {}", key);

        let (held_tx, held_rx) = watch::channel(true);
        let renew_task = {
            let kv = kv.clone();
            let key = key.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ttl / 3);
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    match kv.lease_renew(&key, &token, ttl) {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!("Lost lease {}", key);
                            let _ = held_tx.send(false);
                            return;
                        }
                        Err(e) => {
                            warn!("Lease renewal failed for {}: {}", key, e);
                            let _ = held_tx.send(false);
                            return;
                        }
                    }
                }
            })
        };

        Ok(Some(Self { kv, key, token, held_rx, renew_task: Mutex::new(Some(renew_task)) }))
    }

    pub fn is_held(&self) -> bool {
        *self.held_rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.held_rx.clone()
    }

    /// Stop renewing and give the lease back.
    pub fn release(&self) {
        if let Ok(mut guard) = self.renew_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
        if let Err(e) = self.kv.lease_release(&self.key, &self.token) {
            warn!("Lease release failed for {}: {}", self.key, e);
        }
    }
}

impl Drop for LeaseLock {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.renew_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}
