// Marketplace enablement table: which (marketplace, kind) pairs the relayer
// accepts, and the transaction builder capability for each enabled pair.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ValidationError};
use crate::types::{Order, OrderMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Marketplace {
    Infinity,
    Seaport,
    WyvernV2,
    #[serde(rename = "wyvern-v2.3")]
    WyvernV2_3,
    LooksRare,
    ZeroexV4Erc721,
    ZeroexV4Erc1155,
    Foundation,
    X2y2,
    Rarible,
    ElementErc721,
    ElementErc1155,
    Quixotic,
    Nouns,
    ZoraV3,
    Mint,
    Cryptopunks,
    Sudoswap,
    Universe,
    Nftx,
    Blur,
    Forward,
}

impl Marketplace {
    pub const ALL: [Marketplace; 22] = [
        Marketplace::Infinity,
        Marketplace::Seaport,
        Marketplace::WyvernV2,
        Marketplace::WyvernV2_3,
        Marketplace::LooksRare,
        Marketplace::ZeroexV4Erc721,
        Marketplace::ZeroexV4Erc1155,
        Marketplace::Foundation,
        Marketplace::X2y2,
        Marketplace::Rarible,
        Marketplace::ElementErc721,
        Marketplace::ElementErc1155,
        Marketplace::Quixotic,
        Marketplace::Nouns,
        Marketplace::ZoraV3,
        Marketplace::Mint,
        Marketplace::Cryptopunks,
        Marketplace::Sudoswap,
        Marketplace::Universe,
        Marketplace::Nftx,
        Marketplace::Blur,
        Marketplace::Forward,
    ];
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marketplace::Infinity => "infinity",
            Marketplace::Seaport => "seaport",
            Marketplace::WyvernV2 => "wyvern-v2",
            Marketplace::WyvernV2_3 => "wyvern-v2.3",
            Marketplace::LooksRare => "looks-rare",
            Marketplace::ZeroexV4Erc721 => "zeroex-v4-erc721",
            Marketplace::ZeroexV4Erc1155 => "zeroex-v4-erc1155",
            Marketplace::Foundation => "foundation",
            Marketplace::X2y2 => "x2y2",
            Marketplace::Rarible => "rarible",
            Marketplace::ElementErc721 => "element-erc721",
            Marketplace::ElementErc1155 => "element-erc1155",
            Marketplace::Quixotic => "quixotic",
            Marketplace::Nouns => "nouns",
            Marketplace::ZoraV3 => "zora-v3",
            Marketplace::Mint => "mint",
            Marketplace::Cryptopunks => "cryptopunks",
            Marketplace::Sudoswap => "sudoswap",
            Marketplace::Universe => "universe",
            Marketplace::Nftx => "nftx",
            Marketplace::Blur => "blur",
            Marketplace::Forward => "forward",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderKind {
    SingleToken,
    ContractWide,
    Complex,
    BundleAsk,
    TokenList,
}

impl OrderKind {
    pub const ALL: [OrderKind; 5] = [
        OrderKind::SingleToken,
        OrderKind::ContractWide,
        OrderKind::Complex,
        OrderKind::BundleAsk,
        OrderKind::TokenList,
    ];
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderKind::SingleToken => "single-token",
            OrderKind::ContractWide => "contract-wide",
            OrderKind::Complex => "complex",
            OrderKind::BundleAsk => "bundle-ask",
            OrderKind::TokenList => "token-list",
        };
        f.write_str(name)
    }
}

/// Calldata for one match, ready to be wrapped into a signed transaction.
#[derive(Debug, Clone)]
pub struct TxnData {
    /// Exchange contract the transaction targets.
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Encodes a proposed match into exchange-contract calldata. Implementations
/// splice the orders' opaque signed payloads; they never re-interpret them.
pub trait TxnBuilder: Send + Sync {
    fn marketplace(&self) -> Marketplace;
    fn exchange(&self) -> Address;
    fn build(&self, mtch: &OrderMatch, listing: &Order, offer: &Order)
        -> Result<TxnData, ExecutionError>;
}

#[derive(Clone, Default)]
pub struct KindEntry {
    pub enabled: bool,
    pub builder: Option<Arc<dyn TxnBuilder>>,
}

#[derive(Clone, Default)]
pub struct MarketplaceEntry {
    pub enabled: bool,
    pub kinds: HashMap<OrderKind, KindEntry>,
}

/// Static configuration mapping marketplace -> per-kind enablement and
/// builder capability. Every recognized pair has a row; rows default to
/// disabled with no builder.
#[derive(Clone, Default)]
pub struct MarketplaceRegistry {
    entries: HashMap<Marketplace, MarketplaceEntry>,
}

impl MarketplaceRegistry {
    /// A registry with every recognized (marketplace, kind) pair present
    /// and disabled. Callers enable rows and attach builders on top.
    pub fn all_disabled() -> Self {
        let mut entries = HashMap::new();
        for marketplace in Marketplace::ALL {
            let mut kinds = HashMap::new();
            for kind in OrderKind::ALL {
                kinds.insert(kind, KindEntry::default());
            }
            entries.insert(marketplace, MarketplaceEntry { enabled: false, kinds });
        }
        Self { entries }
    }

    pub fn enable(
        &mut self,
        marketplace: Marketplace,
        kind: OrderKind,
        builder: Arc<dyn TxnBuilder>,
    ) {
        let entry = self.entries.entry(marketplace).or_default();
        entry.enabled = true;
        entry.kinds.insert(kind, KindEntry { enabled: true, builder: Some(builder) });
    }

    /// Register a builder for a pair without enabling it. The pair stays
    /// rejected at ingestion but the capability is wired for later turn-on.
    pub fn register_disabled(
        &mut self,
        marketplace: Marketplace,
        kind: OrderKind,
        builder: Arc<dyn TxnBuilder>,
    ) {
        let entry = self.entries.entry(marketplace).or_default();
        entry.kinds.insert(kind, KindEntry { enabled: false, builder: Some(builder) });
    }

    pub fn is_enabled(&self, marketplace: Marketplace, kind: OrderKind) -> bool {
        self.entries
            .get(&marketplace)
            .filter(|m| m.enabled)
            .and_then(|m| m.kinds.get(&kind))
            .map(|k| k.enabled)
            .unwrap_or(false)
    }

    /// Ingestion gate: an unsupported pair rejects with UnsupportedOrderKind.
    pub fn require_enabled(
        &self,
        marketplace: Marketplace,
        kind: OrderKind,
    ) -> Result<(), ValidationError> {
        if self.is_enabled(marketplace, kind) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedOrderKind {
                marketplace: marketplace.to_string(),
                kind: kind.to_string(),
            })
        }
    }

    pub fn builder(
        &self,
        marketplace: Marketplace,
        kind: OrderKind,
    ) -> Result<Arc<dyn TxnBuilder>, ExecutionError> {
        self.entries
            .get(&marketplace)
            .filter(|m| m.enabled)
            .and_then(|m| m.kinds.get(&kind))
            .filter(|k| k.enabled)
            .and_then(|k| k.builder.clone())
            .ok_or_else(|| ExecutionError::NoBuilder {
                marketplace: marketplace.to_string(),
                kind: kind.to_string(),
            })
    }

    /// Startup exhaustiveness check: an enabled pair with no builder is a
    /// configuration gap and fails fast before any order is accepted.
    pub fn verify(&self) -> anyhow::Result<()> {
        for (marketplace, entry) in &self.entries {
            if !entry.enabled {
                continue;
            }
            for (kind, kind_entry) in &entry.kinds {
                if kind_entry.enabled && kind_entry.builder.is_none() {
                    anyhow::bail!(
                        "marketplace {}:{} is enabled but has no transaction builder",
                        marketplace,
                        kind
                    );
                }
            }
        }
        Ok(())
    }
}
