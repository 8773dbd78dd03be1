// KV key layout. Global entities carry the orderbook:v1:chain:{chainId}:
// prefix; per-asset index sets use the unprefixed scope pattern.

use alloy::primitives::{hex, Address, U256};

use crate::error::ValidationError;
use crate::types::{AssetScope, Order, OrderSide};

/// Sentinel score for membership-style sorted sets (active, executed),
/// keeping insertion order independent while allowing bounded scans.
pub const SENTINEL_SCORE: f64 = -1.0;

pub fn addr_key(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr))
}

fn side_label(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

#[derive(Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(chain_id: u64) -> Self {
        Self { prefix: format!("orderbook:v1:chain:{}:", chain_id) }
    }

    pub fn orders(&self) -> String {
        format!("{}orders", self.prefix)
    }

    pub fn active(&self) -> String {
        format!("{}order-status:active", self.prefix)
    }

    pub fn executed(&self) -> String {
        format!("{}order-status:executed", self.prefix)
    }

    pub fn order_full(&self, order_id: &str) -> String {
        format!("{}orders:{}:full", self.prefix, order_id)
    }

    pub fn order_matches(&self, order_id: &str) -> String {
        format!("{}order-matches:{}", self.prefix, order_id)
    }

    pub fn match_full(&self, match_id: &str) -> String {
        format!("{}order-matches:{}:full", self.prefix, match_id)
    }

    pub fn matches_by_gas_price(&self) -> String {
        format!("{}order-matches:by-gas-price", self.prefix)
    }
}

fn asset_index_key(
    scope_label: &str,
    complication: &Address,
    currency: &Address,
    side: OrderSide,
    collection: &Address,
    token_id: Option<&U256>,
) -> String {
    let mut key = format!(
        "scope:{}:complication:{}:currency:{}:side:{}:collection:{}",
        scope_label,
        addr_key(complication),
        addr_key(currency),
        side_label(side),
        addr_key(collection),
    );
    if let Some(token_id) = token_id {
        key.push_str(&format!(":tokenId:{}", token_id));
    }
    key
}

/// Index sets an order belongs to, derived from (side, scope, asset).
/// A single-token entry lives in a per-token set and its collection rollup;
/// a collection-wide bid lives only in the collection-wide set.
/// Collection-wide listings are unsupported.
pub fn index_set_keys(order: &Order) -> Result<Vec<String>, ValidationError> {
    let side = order.side;
    let complication = &order.complication;
    let currency = &order.currency;
    match (&order.scope, side) {
        (AssetScope::SingleToken { collection, token_id }, _) => Ok(vec![
            asset_index_key("token", complication, currency, side, collection, Some(token_id)),
            asset_index_key("collection-token", complication, currency, side, collection, None),
        ]),
        (AssetScope::CollectionWide { collection }, OrderSide::Buy) => Ok(vec![
            asset_index_key("collection-wide", complication, currency, side, collection, None),
        ]),
        (AssetScope::CollectionWide { .. }, OrderSide::Sell) => {
            Err(ValidationError::CollectionWideListing)
        }
    }
}

/// The per-token index set for one concrete token, used by the matching
/// engine to probe the opposite side of a trigger order.
pub fn token_index_key(
    complication: &Address,
    currency: &Address,
    side: OrderSide,
    collection: &Address,
    token_id: &U256,
) -> String {
    asset_index_key("token", complication, currency, side, collection, Some(token_id))
}

pub fn collection_rollup_key(
    complication: &Address,
    currency: &Address,
    side: OrderSide,
    collection: &Address,
) -> String {
    asset_index_key("collection-token", complication, currency, side, collection, None)
}

pub fn collection_wide_key(
    complication: &Address,
    currency: &Address,
    side: OrderSide,
    collection: &Address,
) -> String {
    asset_index_key("collection-wide", complication, currency, side, collection, None)
}

pub fn nonce_lock_key(account: &Address, exchange: &Address) -> String {
    format!(
        "nonce-provider:account:{}:exchange:{}:lock",
        addr_key(account),
        addr_key(exchange)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{Marketplace, OrderKind};
    use crate::types::OrderStatus;
    use alloy::primitives::Bytes;

    fn order(side: OrderSide, scope: AssetScope) -> Order {
        Order {
            id: format!("0x{}", "ab".repeat(32)),
            chain_id: 1,
            marketplace: Marketplace::Seaport,
            kind: OrderKind::SingleToken,
            side,
            scope,
            complication: Address::repeat_byte(0x0c),
            currency: Address::repeat_byte(0x0e),
            start_price_eth: 1.0,
            end_price_eth: 1.0,
            start_time: 0,
            end_time: 10,
            nonce: 1,
            signer: Address::repeat_byte(0x01),
            signed_payload: Bytes::new(),
            token_allow_list: None,
            status: OrderStatus::Active,
        }
    }

    #[test]
    fn test_single_token_order_gets_token_and_rollup_sets() {
        let collection = Address::repeat_byte(0xaa);
        let o = order(
            OrderSide::Sell,
            AssetScope::SingleToken { collection, token_id: U256::from(5) },
        );
        let keys = index_set_keys(&o).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].starts_with("scope:token:"));
        assert!(keys[0].ends_with(":tokenId:5"));
        assert!(keys[1].starts_with("scope:collection-token:"));
    }

    #[test]
    fn test_collection_wide_bid_gets_single_set() {
        let collection = Address::repeat_byte(0xaa);
        let o = order(OrderSide::Buy, AssetScope::CollectionWide { collection });
        let keys = index_set_keys(&o).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("scope:collection-wide:"));
        assert!(keys[0].contains(":side:buy:"));
    }

    #[test]
    fn test_collection_wide_listing_is_rejected() {
        let collection = Address::repeat_byte(0xaa);
        let o = order(OrderSide::Sell, AssetScope::CollectionWide { collection });
        assert!(index_set_keys(&o).is_err());
    }
}
