// Execution engine protocol: watermark filtering, nonce consumption, and
// the sent/dropped submission paths against stub chain and broadcaster

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::Utc;

use match_relayer::chain::broadcaster::{BroadcastOutcome, Broadcaster};
use match_relayer::chain::txn::TxnSigner;
use match_relayer::chain::ChainApi;
use match_relayer::error::ChainError;
use match_relayer::execution::{ExecutionEngine, TARGET_BLOCK_OFFSET};
use match_relayer::marketplace::{Marketplace, OrderKind};
use match_relayer::matching::MatchingEngine;
use match_relayer::nonce::NonceProvider;
use match_relayer::storage::{InMemoryNonceStore, KvStore, NonceStore, OrderbookStorage};
use match_relayer::types::{
    AssetScope, ExecutionState, Order, OrderSide, OrderStatus, SubmissionStatus,
};

const CHAIN_ID: u64 = 1;
const BLOCK: u64 = 100;

struct StubChain {
    watermark: u64,
}

#[async_trait::async_trait]
impl ChainApi for StubChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(BLOCK)
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn user_min_order_nonce(
        &self,
        _exchange: Address,
        _account: Address,
    ) -> Result<u64, ChainError> {
        Ok(self.watermark)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        Ok(alloy::primitives::keccak256(raw))
    }
}

struct StubBroadcaster {
    outcome: SubmissionStatus,
    seen: Mutex<Vec<(Vec<u8>, u64)>>,
}

impl StubBroadcaster {
    fn new(outcome: SubmissionStatus) -> Self {
        Self { outcome, seen: Mutex::new(Vec::new()) }
    }

    fn broadcast_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Broadcaster for StubBroadcaster {
    async fn broadcast(
        &self,
        raw_tx: &[u8],
        target_block: u64,
    ) -> Result<BroadcastOutcome, ChainError> {
        self.seen.lock().unwrap().push((raw_tx.to_vec(), target_block));
        let tx_hash = match self.outcome {
            SubmissionStatus::Sent => Some(alloy::primitives::keccak256(raw_tx)),
            SubmissionStatus::Dropped => None,
        };
        Ok(BroadcastOutcome { status: self.outcome, tx_hash })
    }
}

fn order_id(seed: u8) -> String {
    format!("0x{}", format!("{:02x}", seed).repeat(32))
}

fn make_order(seed: u8, side: OrderSide, price: f64, marketplace_nonce: u64) -> Order {
    let now = Utc::now().timestamp();
    Order {
        id: order_id(seed),
        chain_id: CHAIN_ID,
        marketplace: Marketplace::Seaport,
        kind: OrderKind::SingleToken,
        side,
        scope: AssetScope::SingleToken {
            collection: Address::repeat_byte(0x01),
            token_id: U256::from(1),
        },
        complication: Address::repeat_byte(0xc0),
        currency: Address::repeat_byte(0xee),
        start_price_eth: price,
        end_price_eth: price,
        start_time: now - 60,
        end_time: now + 3600,
        nonce: marketplace_nonce,
        signer: Address::repeat_byte(seed),
        signed_payload: Bytes::from(vec![seed; 8]),
        token_allow_list: None,
        status: OrderStatus::Active,
    }
}

struct Harness {
    storage: Arc<OrderbookStorage>,
    matching: MatchingEngine,
    engine: ExecutionEngine,
    broadcaster: Arc<StubBroadcaster>,
    nonce_provider: Arc<NonceProvider>,
}

async fn setup(watermark: u64, outcome: SubmissionStatus) -> Harness {
    let kv = Arc::new(KvStore::new());
    let storage = Arc::new(OrderbookStorage::new(kv.clone(), CHAIN_ID));
    let matching = MatchingEngine::new(storage.clone());
    let chain: Arc<dyn ChainApi> = Arc::new(StubChain { watermark });
    let broadcaster = Arc::new(StubBroadcaster::new(outcome));
    let registry = Arc::new(match_relayer::execution::builders::default_registry(
        Address::repeat_byte(0x99),
    ));
    let nonce_store = Arc::new(InMemoryNonceStore::new()) as Arc<dyn NonceStore>;
    let nonce_provider = Arc::new(
        NonceProvider::new(
            kv,
            nonce_store,
            chain.clone(),
            CHAIN_ID,
            Address::repeat_byte(0xa1),
            Address::repeat_byte(0xe1),
        )
        .with_debounce(Duration::from_millis(10)),
    );
    nonce_provider.run().await.unwrap();

    let engine = ExecutionEngine::new(
        storage.clone(),
        chain,
        broadcaster.clone(),
        registry,
        nonce_provider.clone(),
        Arc::new(TxnSigner::random(CHAIN_ID)),
    );
    Harness { storage, matching, engine, broadcaster, nonce_provider }
}

#[tokio::test]
async fn test_sent_submission_marks_orders_executed() {
    let h = setup(0, SubmissionStatus::Sent).await;
    let sell = make_order(0x11, OrderSide::Sell, 0.1, 5);
    let buy = make_order(0x22, OrderSide::Buy, 0.15, 5);
    h.storage.save(&sell).await.unwrap();
    h.storage.save(&buy).await.unwrap();
    let matches = h.matching.match_order(&sell).await.unwrap();

    let submissions = h.engine.execute_matches(matches.clone()).await.unwrap();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].status, SubmissionStatus::Sent);
    assert_eq!(submissions[0].target_block, BLOCK + TARGET_BLOCK_OFFSET);
    assert!(submissions[0].tx_hash.is_some());

    // Both parents left the active indices into the executed set, and the
    // match was consumed.
    for id in [&sell.id, &buy.id] {
        let status = h.storage.get_execution_status(id).await.unwrap();
        assert_eq!(status.state, ExecutionState::Executed);
    }
    assert!(h.storage.get_match(&matches[0].id).await.unwrap().is_none());
    assert_eq!(h.broadcaster.broadcast_count(), 1);
}

#[tokio::test]
async fn test_dropped_submission_keeps_orders_active_and_burns_nonce() {
    let h = setup(0, SubmissionStatus::Dropped).await;
    let sell = make_order(0x11, OrderSide::Sell, 0.1, 5);
    let buy = make_order(0x22, OrderSide::Buy, 0.15, 5);
    h.storage.save(&sell).await.unwrap();
    h.storage.save(&buy).await.unwrap();
    let matches = h.matching.match_order(&sell).await.unwrap();

    let submissions = h.engine.execute_matches(matches).await.unwrap();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].status, SubmissionStatus::Dropped);

    // Parents stay re-queueable.
    for id in [&sell.id, &buy.id] {
        assert!(h.storage.has(id).await.unwrap());
        let status = h.storage.get_execution_status(id).await.unwrap();
        assert_eq!(status.state, ExecutionState::Matched);
    }

    // The consumed nonce is burned, never re-used.
    let next = h.nonce_provider.get_nonce().await.unwrap();
    assert_eq!(next, submissions[0].nonce + 1);
}

#[tokio::test]
async fn test_watermarked_orders_are_discarded_without_a_nonce() {
    // Watermark 10 cancels marketplace nonces <= 10.
    let h = setup(10, SubmissionStatus::Sent).await;
    let sell = make_order(0x11, OrderSide::Sell, 0.1, 5);
    let buy = make_order(0x22, OrderSide::Buy, 0.15, 5);
    h.storage.save(&sell).await.unwrap();
    h.storage.save(&buy).await.unwrap();
    let matches = h.matching.match_order(&sell).await.unwrap();

    let submissions = h.engine.execute_matches(matches).await.unwrap();
    assert!(submissions.is_empty());
    assert_eq!(h.broadcaster.broadcast_count(), 0);

    // No nonce was consumed: the next allocation is the first integer.
    assert_eq!(h.nonce_provider.get_nonce().await.unwrap(), 11);
}

#[tokio::test]
async fn test_builder_rejection_consumes_no_nonce() {
    let h = setup(0, SubmissionStatus::Sent).await;
    let mut sell = make_order(0x11, OrderSide::Sell, 0.1, 5);
    sell.signed_payload = Bytes::new();
    let buy = make_order(0x22, OrderSide::Buy, 0.15, 5);
    h.storage.save(&sell).await.unwrap();
    h.storage.save(&buy).await.unwrap();
    let matches = h.matching.match_order(&sell).await.unwrap();
    assert_eq!(matches.len(), 1);

    let submissions = h.engine.execute_matches(matches).await.unwrap();
    assert!(submissions.is_empty());
    assert_eq!(h.broadcaster.broadcast_count(), 0);
    assert_eq!(h.nonce_provider.get_nonce().await.unwrap(), 1);
}

#[tokio::test]
async fn test_stale_match_is_skipped() {
    let h = setup(0, SubmissionStatus::Sent).await;
    let sell = make_order(0x11, OrderSide::Sell, 0.1, 5);
    let buy = make_order(0x22, OrderSide::Buy, 0.15, 5);
    h.storage.save(&sell).await.unwrap();
    h.storage.save(&buy).await.unwrap();
    let matches = h.matching.match_order(&sell).await.unwrap();

    // The listing is cancelled between matching and execution.
    let mut cancelled = sell.clone();
    cancelled.status = OrderStatus::Cancelled;
    h.storage.save(&cancelled).await.unwrap();

    let submissions = h.engine.execute_matches(matches).await.unwrap();
    assert!(submissions.is_empty());
    assert_eq!(h.broadcaster.broadcast_count(), 0);
}

#[tokio::test]
async fn test_batch_executes_best_gas_budget_first() {
    let h = setup(0, SubmissionStatus::Sent).await;
    let sell_cheap = make_order(0x11, OrderSide::Sell, 0.1, 5);
    let buy_cheap = make_order(0x22, OrderSide::Buy, 0.12, 5);
    h.storage.save(&sell_cheap).await.unwrap();
    h.storage.save(&buy_cheap).await.unwrap();
    let mut matches = h.matching.match_order(&sell_cheap).await.unwrap();

    let mut sell_rich = make_order(0x33, OrderSide::Sell, 0.1, 5);
    sell_rich.scope = AssetScope::SingleToken {
        collection: Address::repeat_byte(0x01),
        token_id: U256::from(2),
    };
    let mut buy_rich = make_order(0x44, OrderSide::Buy, 0.5, 5);
    buy_rich.scope = sell_rich.scope.clone();
    h.storage.save(&sell_rich).await.unwrap();
    h.storage.save(&buy_rich).await.unwrap();
    matches.extend(h.matching.match_order(&sell_rich).await.unwrap());

    let submissions = h.engine.execute_matches(matches).await.unwrap();
    assert_eq!(submissions.len(), 2);
    // The richer match went out first and therefore took the lower nonce.
    assert_eq!(submissions[0].match_id, match_relayer::types::OrderMatch::compute_id(
        &sell_rich.id,
        &buy_rich.id,
    ));
    assert!(submissions[0].nonce < submissions[1].nonce);
}
