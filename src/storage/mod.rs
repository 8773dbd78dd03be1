// Storage layer: sorted-set KV index store, orderbook storage, and the
// document store holding durable nonce state

pub mod docstore;
pub mod keys;
pub mod kv;
pub mod orderbook;

pub use docstore::{InMemoryNonceStore, NonceStore};
pub use kv::{KvOp, KvStore};
pub use orderbook::OrderbookStorage;
