// Document store holding durable nonce state, keyed by
// matchExecutors/{account}/nonces/{exchange}

use std::collections::HashMap;
use std::sync::RwLock;

use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::storage::keys::addr_key;
use crate::types::NonceRecord;

pub fn nonce_doc_path(account: &Address, exchange: &Address) -> String {
    format!("matchExecutors/{}/nonces/{}", addr_key(account), addr_key(exchange))
}

/// Durable nonce state. The live value is owned by the lease holder; the
/// store is the authoritative copy across lease handovers.
#[async_trait::async_trait]
pub trait NonceStore: Send + Sync {
    async fn get_nonce_record(
        &self,
        account: &Address,
        exchange: &Address,
    ) -> Result<Option<NonceRecord>>;

    /// Merge-write: updates the nonce and updatedAt, preserving createdAt
    /// when the document already exists.
    async fn merge_nonce_record(&self, record: &NonceRecord) -> Result<()>;
}

pub struct InMemoryNonceStore {
    docs: RwLock<HashMap<String, NonceRecord>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self { docs: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn get_nonce_record(
        &self,
        account: &Address,
        exchange: &Address,
    ) -> Result<Option<NonceRecord>> {
        let docs = self
            .docs
            .read()
            .map_err(|e| anyhow!("failed to acquire read lock on nonce docs: {}", e))?;
        Ok(docs.get(&nonce_doc_path(account, exchange)).cloned())
    }

    async fn merge_nonce_record(&self, record: &NonceRecord) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| anyhow!("failed to acquire write lock on nonce docs: {}", e))?;
        let path = nonce_doc_path(&record.match_executor_address, &record.exchange_address);
        let merged = match docs.get(&path) {
            Some(existing) => NonceRecord {
                nonce: record.nonce.clone(),
                updated_at: Utc::now(),
                created_at: existing.created_at,
                ..record.clone()
            },
            None => record.clone(),
        };
        docs.insert(path, merged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(nonce: u64) -> NonceRecord {
        NonceRecord {
            chain_id: 1,
            match_executor_address: Address::repeat_byte(0x01),
            exchange_address: Address::repeat_byte(0x02),
            nonce: nonce.to_string(),
            updated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_merge_preserves_created_at() {
        let store = InMemoryNonceStore::new();
        let first = record(1);
        store.merge_nonce_record(&first).await.unwrap();

        store.merge_nonce_record(&record(2)).await.unwrap();
        let loaded = store
            .get_nonce_record(&Address::repeat_byte(0x01), &Address::repeat_byte(0x02))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.nonce_value(), 2);
        assert_eq!(loaded.created_at, first.created_at);
    }
}
