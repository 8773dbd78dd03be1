// Matching and execution core for an on-chain NFT marketplace relayer

use std::sync::Arc;

use tokio::sync::mpsc;

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod execution;
pub mod marketplace;
pub mod matching;
pub mod nonce;
pub mod storage;
pub mod types;

pub use types::*;

use crate::config::Config;
use crate::marketplace::MarketplaceRegistry;
use crate::matching::MatchingEngine;
use crate::storage::OrderbookStorage;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<OrderbookStorage>,
    pub matching: Arc<MatchingEngine>,
    pub registry: Arc<MarketplaceRegistry>,
    pub match_tx: mpsc::UnboundedSender<OrderMatch>,
}
