// End-to-end matching scenarios against the in-memory orderbook indices

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use chrono::Utc;

use match_relayer::marketplace::{Marketplace, OrderKind};
use match_relayer::matching::MatchingEngine;
use match_relayer::storage::{KvStore, OrderbookStorage};
use match_relayer::types::{AssetScope, Order, OrderMatch, OrderSide, OrderStatus};

const CHAIN_ID: u64 = 1;

fn order_id(seed: u8) -> String {
    format!("0x{}", format!("{:02x}", seed).repeat(32))
}

fn collection() -> Address {
    Address::repeat_byte(0x01)
}

fn base_order(seed: u8, side: OrderSide, scope: AssetScope, price: f64) -> Order {
    let now = Utc::now().timestamp();
    Order {
        id: order_id(seed),
        chain_id: CHAIN_ID,
        marketplace: Marketplace::Seaport,
        kind: match &scope {
            AssetScope::SingleToken { .. } => OrderKind::SingleToken,
            AssetScope::CollectionWide { .. } => OrderKind::ContractWide,
        },
        side,
        scope,
        complication: Address::repeat_byte(0xc0),
        currency: Address::repeat_byte(0xee),
        start_price_eth: price,
        end_price_eth: price,
        start_time: now - 60,
        end_time: now + 3600,
        nonce: 5,
        signer: Address::repeat_byte(seed),
        signed_payload: Bytes::from(vec![seed; 8]),
        token_allow_list: None,
        status: OrderStatus::Active,
    }
}

fn listing(seed: u8, token_id: u64, price: f64) -> Order {
    base_order(
        seed,
        OrderSide::Sell,
        AssetScope::SingleToken { collection: collection(), token_id: U256::from(token_id) },
        price,
    )
}

fn token_bid(seed: u8, token_id: u64, price: f64) -> Order {
    base_order(
        seed,
        OrderSide::Buy,
        AssetScope::SingleToken { collection: collection(), token_id: U256::from(token_id) },
        price,
    )
}

fn collection_bid(seed: u8, price: f64) -> Order {
    base_order(
        seed,
        OrderSide::Buy,
        AssetScope::CollectionWide { collection: collection() },
        price,
    )
}

fn setup() -> (Arc<OrderbookStorage>, MatchingEngine) {
    let kv = Arc::new(KvStore::new());
    let storage = Arc::new(OrderbookStorage::new(kv, CHAIN_ID));
    let engine = MatchingEngine::new(storage.clone());
    (storage, engine)
}

#[tokio::test]
async fn test_equal_prices_match_with_zero_gas_budget() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.1);
    let buy = token_bid(0x22, 1, 0.1);
    storage.save(&sell).await.unwrap();
    storage.save(&buy).await.unwrap();

    let matches = engine.match_order(&sell).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].listing_id, sell.id);
    assert_eq!(matches[0].offer_id, buy.id);
    assert_eq!(matches[0].max_gas_price_eth, 0.0);
}

#[tokio::test]
async fn test_bid_below_ask_produces_no_match() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.2);
    let buy = token_bid(0x22, 1, 0.1);
    storage.save(&sell).await.unwrap();
    storage.save(&buy).await.unwrap();

    assert!(engine.match_order(&sell).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_collection_wide_bid_matches_token_listing() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.1);
    let buy = collection_bid(0x22, 0.15);
    storage.save(&sell).await.unwrap();
    storage.save(&buy).await.unwrap();

    let matches = engine.match_order(&sell).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert!((matches[0].max_gas_price_eth - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_matches_rank_by_gas_budget_descending() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.1);
    let low = token_bid(0x22, 1, 0.2);
    let high = token_bid(0x33, 1, 0.3);
    storage.save(&sell).await.unwrap();
    storage.save(&low).await.unwrap();
    storage.save(&high).await.unwrap();

    let matches = engine.match_order(&sell).await.unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].offer_id, high.id);
    assert_eq!(matches[1].offer_id, low.id);
    assert!(matches[0].max_gas_price_eth > matches[1].max_gas_price_eth);
}

#[tokio::test]
async fn test_match_id_is_deterministic_over_the_pair() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.1);
    let buy = token_bid(0x22, 1, 0.1);
    storage.save(&sell).await.unwrap();
    storage.save(&buy).await.unwrap();

    let from_sell = engine.match_order(&sell).await.unwrap();
    let from_buy = engine.match_order(&buy).await.unwrap();
    assert_eq!(from_sell[0].id, from_buy[0].id);
    assert_eq!(from_sell[0].id, OrderMatch::compute_id(&buy.id, &sell.id));
}

#[tokio::test]
async fn test_match_is_persisted_on_both_sides() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.1);
    let buy = token_bid(0x22, 1, 0.12);
    storage.save(&sell).await.unwrap();
    storage.save(&buy).await.unwrap();

    let matches = engine.match_order(&sell).await.unwrap();
    let match_id = matches[0].id.clone();

    let sell_side = storage.matches_for_order(&sell.id).await.unwrap();
    let buy_side = storage.matches_for_order(&buy.id).await.unwrap();
    assert_eq!(sell_side.len(), 1);
    assert_eq!(buy_side.len(), 1);
    assert_eq!(sell_side[0].id, match_id);
    assert_eq!(buy_side[0].id, match_id);
}

#[tokio::test]
async fn test_expired_candidate_is_skipped() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 1, 0.1);
    let mut stale = token_bid(0x22, 1, 0.2);
    let now = Utc::now().timestamp();
    stale.start_time = now - 7200;
    stale.end_time = now - 3600;
    storage.save(&sell).await.unwrap();
    storage.save(&stale).await.unwrap();

    assert!(engine.match_order(&sell).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_token_allow_list_gates_collection_bid() {
    let (storage, engine) = setup();
    let sell = listing(0x11, 7, 0.1);
    let mut bid = collection_bid(0x22, 0.2);
    bid.kind = OrderKind::TokenList;
    bid.token_allow_list = Some(vec![U256::from(1), U256::from(2)]);
    storage.save(&sell).await.unwrap();
    storage.save(&bid).await.unwrap();

    // Token 7 is outside the allow-list.
    assert!(engine.match_order(&bid).await.unwrap().is_empty());

    let mut covering = collection_bid(0x33, 0.2);
    covering.kind = OrderKind::TokenList;
    covering.token_allow_list = Some(vec![U256::from(7)]);
    storage.save(&covering).await.unwrap();

    let matches = engine.match_order(&covering).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].listing_id, sell.id);
}

#[tokio::test]
async fn test_candidate_cap_bounds_the_scan() {
    let kv = Arc::new(KvStore::new());
    let storage = Arc::new(OrderbookStorage::new(kv, CHAIN_ID));
    let engine = MatchingEngine::with_candidate_cap(storage.clone(), 3);

    let sell = listing(0x11, 1, 0.1);
    storage.save(&sell).await.unwrap();
    for seed in 0x20..0x28 {
        storage.save(&token_bid(seed, 1, 0.2)).await.unwrap();
    }

    let matches = engine.match_order(&sell).await.unwrap();
    assert_eq!(matches.len(), 3);
}
