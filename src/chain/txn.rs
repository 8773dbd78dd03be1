// EIP-1559 transaction construction and local-key signing

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{hex, keccak256, Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use crate::error::ExecutionError;

pub struct TxnSigner {
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl TxnSigner {
    pub fn from_key(private_key_hex: &str, chain_id: u64) -> anyhow::Result<Self> {
        let signer: PrivateKeySigner = private_key_hex
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid private key: {}", e))?;
        Ok(Self { signer, chain_id })
    }

    pub fn random(chain_id: u64) -> Self {
        Self { signer: PrivateKeySigner::random(), chain_id }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign one contract call and return the raw 2718-encoded transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn sign_call(
        &self,
        nonce: u64,
        to: Address,
        data: Bytes,
        value: U256,
        gas_limit: u64,
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    ) -> Result<Vec<u8>, ExecutionError> {
        let mut tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            to: TxKind::Call(to),
            value,
            access_list: Default::default(),
            input: data,
        };
        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;
        let envelope = TxEnvelope::Eip1559(tx.into_signed(signature));
        Ok(envelope.encoded_2718())
    }

    /// Relay auth header value: `address:signature` over the keccak digest
    /// of the request body, hex-encoded as an EIP-191 message.
    pub fn relay_signature(&self, body: &str) -> Result<String, ExecutionError> {
        let digest = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = self
            .signer
            .sign_message_sync(digest.as_bytes())
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;
        Ok(format!(
            "{}:0x{}",
            self.signer.address(),
            hex::encode(signature.as_bytes())
        ))
    }
}

/// Transaction hash of a raw 2718-encoded transaction.
pub fn raw_tx_hash(raw: &[u8]) -> B256 {
    keccak256(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_call_produces_eip1559_envelope() {
        let signer = TxnSigner::random(1);
        let raw = signer
            .sign_call(
                0,
                Address::repeat_byte(0x42),
                Bytes::from(vec![0xde, 0xad]),
                U256::ZERO,
                100_000,
                2_000_000_000,
                1_000_000_000,
            )
            .unwrap();
        // Typed-transaction envelope: first byte is the EIP-1559 type.
        assert_eq!(raw[0], 0x02);
    }

    #[test]
    fn test_relay_signature_names_the_signer() {
        let signer = TxnSigner::random(1);
        let header = signer.relay_signature("{}").unwrap();
        assert!(header.starts_with(&signer.address().to_string()));
        assert!(header.contains(":0x"));
    }
}
