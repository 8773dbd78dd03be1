// Per-marketplace transaction builders. Payload encoding belongs to the
// marketplace SDKs upstream; builders splice the two opaque signed payloads
// into the exchange call without re-interpreting them.

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, U256};

use crate::error::ExecutionError;
use crate::marketplace::{Marketplace, MarketplaceRegistry, OrderKind, TxnBuilder, TxnData};
use crate::types::{Order, OrderMatch};

/// Seaport 1.1 exchange on mainnet and most L2s.
pub const SEAPORT_EXCHANGE: Address = Address::new([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x6c, 0x38, 0x52, 0xcb, 0xEf, 0x3e, 0x08, 0xE8, 0xdF, 0x28,
    0x91, 0x69, 0xEd, 0xE5, 0x81,
]);

fn method_selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn pad32(len: usize) -> usize {
    len.div_ceil(32) * 32
}

/// ABI-encode a call taking two dynamic byte arguments: a two-word head of
/// offsets, then each argument as length word plus right-padded content.
fn encode_two_bytes_call(selector: [u8; 4], first: &[u8], second: &[u8]) -> Bytes {
    let first_offset = 64usize;
    let second_offset = first_offset + 32 + pad32(first.len());

    let mut data = Vec::with_capacity(4 + second_offset + 32 + pad32(second.len()));
    data.extend_from_slice(&selector);
    data.extend_from_slice(&U256::from(first_offset).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(second_offset).to_be_bytes::<32>());
    for arg in [first, second] {
        data.extend_from_slice(&U256::from(arg.len()).to_be_bytes::<32>());
        data.extend_from_slice(arg);
        data.resize(data.len() + pad32(arg.len()) - arg.len(), 0);
    }
    Bytes::from(data)
}

/// Native-exchange builder: hands both signed payloads to the exchange's
/// one-to-one match entry point.
pub struct InfinityBuilder {
    exchange: Address,
}

impl InfinityBuilder {
    pub fn new(exchange: Address) -> Self {
        Self { exchange }
    }
}

impl TxnBuilder for InfinityBuilder {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Infinity
    }

    fn exchange(&self) -> Address {
        self.exchange
    }

    fn build(
        &self,
        _mtch: &OrderMatch,
        listing: &Order,
        offer: &Order,
    ) -> Result<TxnData, ExecutionError> {
        if listing.signed_payload.is_empty() || offer.signed_payload.is_empty() {
            return Err(ExecutionError::Rejected("order is missing its signed payload".into()));
        }
        Ok(TxnData {
            to: self.exchange,
            data: encode_two_bytes_call(
                method_selector("matchOneToOneOrders(bytes,bytes)"),
                &listing.signed_payload,
                &offer.signed_payload,
            ),
            value: U256::ZERO,
        })
    }
}

/// Seaport single-token builder: fulfills the listing against the offer
/// through the seaport exchange.
pub struct SeaportBuilder {
    exchange: Address,
}

impl SeaportBuilder {
    pub fn new() -> Self {
        Self { exchange: SEAPORT_EXCHANGE }
    }
}

impl Default for SeaportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnBuilder for SeaportBuilder {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Seaport
    }

    fn exchange(&self) -> Address {
        self.exchange
    }

    fn build(
        &self,
        _mtch: &OrderMatch,
        listing: &Order,
        offer: &Order,
    ) -> Result<TxnData, ExecutionError> {
        if listing.signed_payload.is_empty() || offer.signed_payload.is_empty() {
            return Err(ExecutionError::Rejected("order is missing its signed payload".into()));
        }
        Ok(TxnData {
            to: self.exchange,
            data: encode_two_bytes_call(
                method_selector("matchOrders(bytes,bytes)"),
                &listing.signed_payload,
                &offer.signed_payload,
            ),
            value: U256::ZERO,
        })
    }
}

/// The default enablement table: seaport single-token live, the native
/// exchange wired for every kind but disabled, everything else rejected.
pub fn default_registry(infinity_exchange: Address) -> MarketplaceRegistry {
    let mut registry = MarketplaceRegistry::all_disabled();
    registry.enable(Marketplace::Seaport, OrderKind::SingleToken, Arc::new(SeaportBuilder::new()));
    for kind in OrderKind::ALL {
        registry.register_disabled(
            Marketplace::Infinity,
            kind,
            Arc::new(InfinityBuilder::new(infinity_exchange)),
        );
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_bytes_encoding_layout() {
        let data = encode_two_bytes_call([0xaa, 0xbb, 0xcc, 0xdd], &[1, 2, 3], &[4; 33]);
        // selector
        assert_eq!(&data[..4], &[0xaa, 0xbb, 0xcc, 0xdd]);
        // head offsets: 0x40 and 0x40 + 32 + pad32(3) = 0x80
        assert_eq!(U256::from_be_slice(&data[4..36]), U256::from(0x40));
        assert_eq!(U256::from_be_slice(&data[36..68]), U256::from(0x80));
        // first arg: length 3, content padded to 32
        assert_eq!(U256::from_be_slice(&data[68..100]), U256::from(3));
        assert_eq!(&data[100..103], &[1, 2, 3]);
        // second arg begins at 4 + 0x80
        assert_eq!(U256::from_be_slice(&data[132..164]), U256::from(33));
        assert_eq!(data.len(), 4 + 64 + 32 + 32 + 32 + 64);
    }

    #[test]
    fn test_default_registry_enablement() {
        let registry = default_registry(Address::repeat_byte(0x33));
        assert!(registry.is_enabled(Marketplace::Seaport, OrderKind::SingleToken));
        assert!(!registry.is_enabled(Marketplace::Infinity, OrderKind::SingleToken));
        assert!(!registry.is_enabled(Marketplace::Blur, OrderKind::SingleToken));
        registry.verify().unwrap();
    }
}
