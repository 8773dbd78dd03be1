// Core types for the relayer: orders, matches, nonce records, submissions

use alloy::primitives::{keccak256, Address, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::marketplace::{Marketplace, OrderKind};

/// A normalized signed marketplace order plus derived attributes.
///
/// The id is the hash of the order's canonical encoding, produced by the
/// originating marketplace SDK. The signed payload is opaque to the core
/// and only re-surfaces inside the on-chain transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub chain_id: u64,
    pub marketplace: Marketplace,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub scope: AssetScope,
    pub complication: Address,
    /// Payment currency; the zero address denotes the native currency.
    pub currency: Address,
    pub start_price_eth: f64,
    pub end_price_eth: f64,
    pub start_time: i64,
    pub end_time: i64,
    /// Marketplace-level order nonce, compared against the exchange's
    /// userMinOrderNonce cancellation watermark at execution time.
    pub nonce: u64,
    pub signer: Address,
    pub signed_payload: Bytes,
    /// Token-id allow-list carried by collection-wide bids of kind token-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_allow_list: Option<Vec<U256>>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Asset scope of an order: one specific token, or any token of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AssetScope {
    SingleToken { collection: Address, token_id: U256 },
    CollectionWide { collection: Address },
}

impl AssetScope {
    pub fn collection(&self) -> Address {
        match self {
            AssetScope::SingleToken { collection, .. } => *collection,
            AssetScope::CollectionWide { collection } => *collection,
        }
    }

    pub fn token_id(&self) -> Option<&U256> {
        match self {
            AssetScope::SingleToken { token_id, .. } => Some(token_id),
            AssetScope::CollectionWide { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal states are sticky; only Active may transition away.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl Order {
    /// Ingestion-time invariant checks. No state is mutated on failure.
    pub fn validate(&self, relayer_chain_id: u64) -> Result<(), ValidationError> {
        validate_order_hash(&self.id)?;
        if self.chain_id != relayer_chain_id {
            return Err(ValidationError::ChainMismatch {
                order: self.chain_id,
                relayer: relayer_chain_id,
            });
        }
        if self.start_time > self.end_time {
            return Err(ValidationError::InvalidTimeWindow {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if self.start_price_eth < 0.0 || self.end_price_eth < 0.0 {
            return Err(ValidationError::NegativePrice(
                self.start_price_eth.min(self.end_price_eth),
            ));
        }
        if self.side == OrderSide::Sell
            && matches!(self.scope, AssetScope::CollectionWide { .. })
        {
            return Err(ValidationError::CollectionWideListing);
        }
        Ok(())
    }

    /// Price at epoch second `t`, linearly interpolated between the start
    /// and end prices over the order's time window.
    pub fn price_at(&self, t: i64) -> f64 {
        if self.end_time <= self.start_time || t <= self.start_time {
            return self.start_price_eth;
        }
        if t >= self.end_time {
            return self.end_price_eth;
        }
        let elapsed = (t - self.start_time) as f64;
        let duration = (self.end_time - self.start_time) as f64;
        self.start_price_eth + (self.end_price_eth - self.start_price_eth) * (elapsed / duration)
    }

    pub fn is_live_at(&self, t: i64) -> bool {
        self.start_time <= t && t <= self.end_time
    }

    /// Whether this bid's asset scope covers a listing's token. Listings are
    /// always single-token; a collection-wide bid covers the whole collection
    /// unless it carries a token allow-list.
    pub fn scope_covers(&self, listing: &Order) -> bool {
        let (collection, token_id) = match &listing.scope {
            AssetScope::SingleToken { collection, token_id } => (*collection, *token_id),
            AssetScope::CollectionWide { .. } => return false,
        };
        match &self.scope {
            AssetScope::SingleToken { collection: c, token_id: t } => {
                *c == collection && *t == token_id
            }
            AssetScope::CollectionWide { collection: c } => {
                if *c != collection {
                    return false;
                }
                match &self.token_allow_list {
                    Some(allowed) => allowed.contains(&token_id),
                    None => true,
                }
            }
        }
    }
}

/// A pair of compatible opposite-side orders. The price slack between them
/// is the budget available to pay gas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderMatch {
    pub id: String,
    /// Sell-side order id.
    pub listing_id: String,
    /// Buy-side order id.
    pub offer_id: String,
    pub max_gas_price_eth: f64,
    pub proposed_at: DateTime<Utc>,
}

impl OrderMatch {
    /// Deterministic match id: keccak over the lexicographically ordered
    /// pair of order ids, so either argument order hashes the same.
    pub fn compute_id(a: &str, b: &str) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let digest = keccak256(format!("{}{}", lo, hi).as_bytes());
        format!("0x{}", alloy::primitives::hex::encode(digest))
    }

    pub fn counterpart_of(&self, order_id: &str) -> Option<&str> {
        if self.listing_id == order_id {
            Some(&self.offer_id)
        } else if self.offer_id == order_id {
            Some(&self.listing_id)
        } else {
            None
        }
    }
}

/// Composite execution state of an order across the active, match, and
/// executed indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionState {
    NotFound,
    Active,
    Matched,
    Executed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub state: ExecutionState,
    pub matches: Vec<OrderMatch>,
}

/// Persisted nonce state for one (account, exchange) pair. The document
/// store copy is authoritative across lease handovers; the in-memory value
/// leads while the lease is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceRecord {
    pub chain_id: u64,
    pub match_executor_address: Address,
    pub exchange_address: Address,
    pub nonce: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NonceRecord {
    pub fn nonce_value(&self) -> u64 {
        self.nonce.parse().unwrap_or(0)
    }
}

/// Outcome of handing one match to the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub match_id: String,
    pub status: SubmissionStatus,
    pub tx_hash: Option<String>,
    pub nonce: u64,
    pub target_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Sent,
    Dropped,
}

/// An order hash is 32 bytes of hex, 0x-prefixed.
pub fn validate_order_hash(id: &str) -> Result<(), ValidationError> {
    let hex_part = id
        .strip_prefix("0x")
        .ok_or_else(|| ValidationError::InvalidOrderHash(id.to_string()))?;
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidOrderHash(id.to_string()));
    }
    Ok(())
}

// API request/response types for the control surface

#[derive(Debug, Deserialize)]
pub struct SubmitOrderRequest {
    #[serde(flatten)]
    pub order: Order,
}

#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    pub order_id: String,
    pub status: String,
    pub matches: Vec<OrderMatch>,
}
