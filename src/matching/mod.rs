// Matching engine: enumerate opposing-side candidates from the orderbook
// indices, validate compatibility, and persist ranked matches.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use crate::storage::keys;
use crate::storage::OrderbookStorage;
use crate::types::{AssetScope, Order, OrderMatch, OrderSide, OrderStatus};

pub const DEFAULT_CANDIDATE_CAP: usize = 50;

pub struct MatchingEngine {
    storage: Arc<OrderbookStorage>,
    candidate_cap: usize,
}

impl MatchingEngine {
    pub fn new(storage: Arc<OrderbookStorage>) -> Self {
        Self::with_candidate_cap(storage, DEFAULT_CANDIDATE_CAP)
    }

    pub fn with_candidate_cap(storage: Arc<OrderbookStorage>, candidate_cap: usize) -> Self {
        Self { storage, candidate_cap }
    }

    /// Find counterparty matches for a trigger order, best gas price first.
    /// Empty when no compatible counterparty exists.
    pub async fn match_order(&self, trigger: &Order) -> Result<Vec<OrderMatch>> {
        let now = Utc::now().timestamp();
        if trigger.status != OrderStatus::Active || !trigger.is_live_at(now) {
            return Ok(Vec::new());
        }

        let index_keys = self.opposing_index_keys(trigger);
        // Buys want the highest bid first; sells want the lowest ask first.
        // The opposing side of a sell is the buy side, scanned descending.
        let descending = trigger.side == OrderSide::Sell;

        let mut seen: HashSet<String> = HashSet::new();
        let mut examined = 0usize;
        let mut ranked: Vec<(OrderMatch, i64, String)> = Vec::new();

        'sets: for index_key in index_keys {
            let page = self.storage.scan_index(&index_key, descending, self.candidate_cap).await?;
            for (candidate_id, _score) in page {
                if examined >= self.candidate_cap {
                    break 'sets;
                }
                if candidate_id == trigger.id || !seen.insert(candidate_id.clone()) {
                    continue;
                }
                examined += 1;

                let Some(candidate) = self.storage.get_order(&candidate_id).await? else {
                    continue;
                };
                if candidate.status != OrderStatus::Active || !candidate.is_live_at(now) {
                    continue;
                }

                let (listing, offer) = match trigger.side {
                    OrderSide::Sell => (trigger, &candidate),
                    OrderSide::Buy => (&candidate, trigger),
                };
                if !offer.scope_covers(listing) {
                    continue;
                }

                let bid = offer.price_at(now);
                let ask = listing.price_at(now);
                if bid < ask {
                    // Candidates come out in price order, so nothing further
                    // in this set can satisfy the condition either.
                    break;
                }

                let mtch = OrderMatch {
                    id: OrderMatch::compute_id(&listing.id, &offer.id),
                    listing_id: listing.id.clone(),
                    offer_id: offer.id.clone(),
                    max_gas_price_eth: (bid - ask).max(0.0),
                    proposed_at: Utc::now(),
                };
                debug!(
                    "Proposed match {} ({} <-> {}) with gas budget {}",
                    mtch.id, mtch.listing_id, mtch.offer_id, mtch.max_gas_price_eth
                );
                ranked.push((mtch, candidate.start_time, candidate.id.clone()));
            }
        }

        // Rank by gas budget; ties go to the earlier-started candidate,
        // then to the smaller id.
        ranked.sort_by(|a, b| {
            b.0.max_gas_price_eth
                .total_cmp(&a.0.max_gas_price_eth)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut matches = Vec::with_capacity(ranked.len());
        for (mtch, _, _) in ranked {
            self.storage.save_match(&mtch).await?;
            matches.push(mtch);
        }

        if !matches.is_empty() {
            info!("Order {} matched {} counterparties", trigger.id, matches.len());
        }
        Ok(matches)
    }

    /// Index sets holding potential counterparties for a trigger order.
    fn opposing_index_keys(&self, trigger: &Order) -> Vec<String> {
        let complication = &trigger.complication;
        let currency = &trigger.currency;
        match (&trigger.scope, trigger.side) {
            // A token listing is answered by token bids and collection-wide bids.
            (AssetScope::SingleToken { collection, token_id }, OrderSide::Sell) => vec![
                keys::token_index_key(complication, currency, OrderSide::Buy, collection, token_id),
                keys::collection_wide_key(complication, currency, OrderSide::Buy, collection),
            ],
            // A token bid is answered by listings on that exact token.
            (AssetScope::SingleToken { collection, token_id }, OrderSide::Buy) => vec![
                keys::token_index_key(complication, currency, OrderSide::Sell, collection, token_id),
            ],
            // A collection-wide bid with an allow-list probes each listed
            // token; otherwise the collection rollup of listings.
            (AssetScope::CollectionWide { collection }, OrderSide::Buy) => {
                match &trigger.token_allow_list {
                    Some(token_ids) => token_ids
                        .iter()
                        .map(|token_id| {
                            keys::token_index_key(
                                complication,
                                currency,
                                OrderSide::Sell,
                                collection,
                                token_id,
                            )
                        })
                        .collect(),
                    None => vec![keys::collection_rollup_key(
                        complication,
                        currency,
                        OrderSide::Sell,
                        collection,
                    )],
                }
            }
            // Collection-wide listings are rejected at ingestion.
            (AssetScope::CollectionWide { .. }, OrderSide::Sell) => Vec::new(),
        }
    }
}
