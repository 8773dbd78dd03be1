// Indexed orderbook storage over the KV store. All writes to a logical
// entity commit as one atomic batch.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, warn};

use crate::error::StorageError;
use crate::storage::keys::{self, Keys, SENTINEL_SCORE};
use crate::storage::kv::{KvOp, KvStore};
use crate::types::{ExecutionState, ExecutionStatus, Order, OrderMatch, OrderStatus};

pub struct OrderbookStorage {
    kv: Arc<KvStore>,
    keys: Keys,
}

impl OrderbookStorage {
    pub fn new(kv: Arc<KvStore>, chain_id: u64) -> Self {
        Self { kv, keys: Keys::new(chain_id) }
    }

    pub async fn has(&self, order_id: &str) -> Result<bool> {
        self.kv.sismember(&self.keys.orders(), order_id)
    }

    /// Persist one order. Active orders are added to the global and
    /// per-asset indices with the full payload stored alongside; any other
    /// status removes the order from every index and cascade-deletes its
    /// matches.
    pub async fn save(&self, order: &Order) -> Result<()> {
        if order.status == OrderStatus::Active {
            // Terminal states are sticky: an executed order never re-enters
            // the active indices, even though its payload is long gone.
            if self.kv.zscore(&self.keys.executed(), &order.id)?.is_some() {
                warn!("Refusing to re-activate executed order {}", order.id);
                return Ok(());
            }

            let payload = serde_json::to_string(order)?;
            let mut ops = vec![
                KvOp::SAdd { key: self.keys.orders(), member: order.id.clone() },
                KvOp::ZAdd {
                    key: self.keys.active(),
                    member: order.id.clone(),
                    score: SENTINEL_SCORE,
                },
                KvOp::Set { key: self.keys.order_full(&order.id), value: payload },
            ];
            for key in keys::index_set_keys(order)? {
                ops.push(KvOp::ZAdd {
                    key,
                    member: order.id.clone(),
                    score: order.start_price_eth,
                });
            }
            self.kv.exec(ops)?;
            debug!("Indexed active order {}", order.id);
        } else {
            let ops = self.purge_ops(order).await?;
            self.kv.exec(ops)?;
            debug!("Removed order {} ({:?})", order.id, order.status);
        }
        Ok(())
    }

    /// Persist a batch. A failing entry is logged and skipped; the rest of
    /// the batch continues. Returns the number of entries committed.
    pub async fn save_batch(&self, orders: &[Order]) -> usize {
        let mut saved = 0;
        for order in orders {
            match self.save(order).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    error!("Failed to save order {}: {}", order.id, e);
                }
            }
        }
        saved
    }

    /// Mutations that take an order out of every index, including the
    /// cascade over its dependent matches. The counterpart id for each
    /// reverse pointer comes from the pair stored in the match payload.
    async fn purge_ops(&self, order: &Order) -> Result<Vec<KvOp>> {
        let mut ops = Vec::new();

        let match_set = self.keys.order_matches(&order.id);
        for match_id in self.kv.smembers(&match_set)? {
            if let Some(mtch) = self.get_match(&match_id).await? {
                if let Some(counterpart) = mtch.counterpart_of(&order.id) {
                    ops.push(KvOp::SRem {
                        key: self.keys.order_matches(counterpart),
                        member: match_id.clone(),
                    });
                }
            }
            ops.push(KvOp::Del { key: self.keys.match_full(&match_id) });
            ops.push(KvOp::ZRem { key: self.keys.matches_by_gas_price(), member: match_id });
        }
        ops.push(KvOp::Del { key: match_set });

        ops.push(KvOp::SRem { key: self.keys.orders(), member: order.id.clone() });
        ops.push(KvOp::ZRem { key: self.keys.active(), member: order.id.clone() });
        ops.push(KvOp::Del { key: self.keys.order_full(&order.id) });
        for key in keys::index_set_keys(order).into_iter().flatten() {
            ops.push(KvOp::ZRem { key, member: order.id.clone() });
        }
        Ok(ops)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let key = self.keys.order_full(order_id);
        match self.kv.get(&key)? {
            Some(raw) => {
                let order = serde_json::from_str(&raw).map_err(|e| {
                    StorageError::CorruptPayload { key, reason: e.to_string() }
                })?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Status of a known order. Falls back to the executed index once the
    /// payload has been removed; unknown ids yield None.
    pub async fn get_status(&self, order_id: &str) -> Result<Option<OrderStatus>> {
        if let Some(order) = self.get_order(order_id).await? {
            return Ok(Some(order.status));
        }
        if self.kv.zscore(&self.keys.executed(), order_id)?.is_some() {
            return Ok(Some(OrderStatus::Filled));
        }
        Ok(None)
    }

    /// Composite lookup across the active set, the match sets, and the
    /// executed set.
    pub async fn get_execution_status(&self, order_id: &str) -> Result<ExecutionStatus> {
        let matches = self.matches_for_order(order_id).await?;
        if self.kv.zscore(&self.keys.executed(), order_id)?.is_some() {
            return Ok(ExecutionStatus { state: ExecutionState::Executed, matches });
        }
        if self.kv.zscore(&self.keys.active(), order_id)?.is_some() {
            let state = if matches.is_empty() {
                ExecutionState::Active
            } else {
                ExecutionState::Matched
            };
            return Ok(ExecutionStatus { state, matches });
        }
        Ok(ExecutionStatus { state: ExecutionState::NotFound, matches })
    }

    /// Persist a proposed match: both orders' match sets, the full payload,
    /// and the gas-price ranking, in one transaction.
    pub async fn save_match(&self, mtch: &OrderMatch) -> Result<()> {
        let payload = serde_json::to_string(mtch)?;
        self.kv.exec(vec![
            KvOp::SAdd {
                key: self.keys.order_matches(&mtch.listing_id),
                member: mtch.id.clone(),
            },
            KvOp::SAdd {
                key: self.keys.order_matches(&mtch.offer_id),
                member: mtch.id.clone(),
            },
            KvOp::Set { key: self.keys.match_full(&mtch.id), value: payload },
            KvOp::ZAdd {
                key: self.keys.matches_by_gas_price(),
                member: mtch.id.clone(),
                score: mtch.max_gas_price_eth,
            },
        ])
    }

    pub async fn get_match(&self, match_id: &str) -> Result<Option<OrderMatch>> {
        let key = self.keys.match_full(match_id);
        match self.kv.get(&key)? {
            Some(raw) => {
                let mtch = serde_json::from_str(&raw).map_err(|e| {
                    StorageError::CorruptPayload { key, reason: e.to_string() }
                })?;
                Ok(Some(mtch))
            }
            None => Ok(None),
        }
    }

    pub async fn matches_for_order(&self, order_id: &str) -> Result<Vec<OrderMatch>> {
        let mut matches = Vec::new();
        for match_id in self.kv.smembers(&self.keys.order_matches(order_id))? {
            if let Some(mtch) = self.get_match(&match_id).await? {
                matches.push(mtch);
            }
        }
        matches.sort_by(|a, b| {
            b.max_gas_price_eth
                .total_cmp(&a.max_gas_price_eth)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matches)
    }

    /// Record a successful submission: the match is consumed and both parent
    /// orders leave the active indices into the executed set, atomically.
    pub async fn mark_executed(
        &self,
        mtch: &OrderMatch,
        listing: &Order,
        offer: &Order,
    ) -> Result<()> {
        let mut ops = vec![
            KvOp::Del { key: self.keys.match_full(&mtch.id) },
            KvOp::ZRem { key: self.keys.matches_by_gas_price(), member: mtch.id.clone() },
        ];
        for order in [listing, offer] {
            ops.extend(self.purge_ops(order).await?);
            ops.push(KvOp::ZAdd {
                key: self.keys.executed(),
                member: order.id.clone(),
                score: SENTINEL_SCORE,
            });
        }
        self.kv.exec(ops)
    }

    /// Candidate ids with scores from one per-asset index set, best first.
    pub async fn scan_index(
        &self,
        index_key: &str,
        descending: bool,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        self.kv.zrange(index_key, descending, limit)
    }
}
