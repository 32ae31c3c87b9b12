//! The wallet-custody collaborator (§6 "Signer"). The core never sees raw
//! private keys; it only ever asks this narrow capability to sign a request
//! it has already built.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as AlloySigner;

/// One EIP-1559 transaction request, fully parameterized by [`crate::tx`]
/// before it crosses this boundary.
#[derive(Clone, Debug)]
pub struct TxRequest {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub data: Bytes,
    pub value: alloy::primitives::U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    #[error("signing rejected: {0}")]
    Rejected(String),
}

/// External collaborator that holds the signing key. Implementations might
/// wrap a local keystore, an HSM, or a remote KMS call; the core is agnostic.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    fn sign_tx(
        &self,
        request: TxRequest,
    ) -> impl Future<Output = Result<Bytes, SignerError>> + Send;
}

/// Local-key implementation. Builds the transaction itself from the fully
/// parameterized [`TxRequest`] rather than handing it to a wallet-wrapped
/// provider, so the signed raw bytes can be broadcast through
/// [`crate::chain::ChainClient::send_raw_transaction`] independently of
/// whatever transport built the nonce and gas fields.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn from_private_key(raw: &str) -> Result<Self, SignerError> {
        let inner: PrivateKeySigner =
            raw.parse().map_err(|e: alloy::signers::local::LocalSignerError| SignerError::Unavailable(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_tx(&self, request: TxRequest) -> Result<Bytes, SignerError> {
        let mut tx = TxEip1559 {
            chain_id: request.chain_id,
            nonce: request.nonce,
            gas_limit: request.gas_limit,
            max_fee_per_gas: request.max_fee_per_gas,
            max_priority_fee_per_gas: request.max_priority_fee_per_gas,
            to: TxKind::Call(request.to),
            value: request.value,
            input: request.data,
            access_list: Default::default(),
        };

        let signature = self
            .inner
            .sign_transaction(&mut tx)
            .await
            .map_err(|e| SignerError::Rejected(e.to_string()))?;

        let signed = tx.into_signed(signature);
        let envelope = TxEnvelope::from(signed);

        let mut raw = Vec::new();
        envelope.encode_2718(&mut raw);
        Ok(Bytes::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signs_and_encodes_a_call_transaction() {
        let signer = LocalSigner::from_private_key(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();

        let request = TxRequest {
            chain_id: 8453,
            nonce: 0,
            to: Address::ZERO,
            data: Bytes::new(),
            value: alloy::primitives::U256::ZERO,
            gas_limit: 21_000,
            max_fee_per_gas: 1_000_000_000,
            max_priority_fee_per_gas: 100_000_000,
        };

        let address = signer.address();
        let raw = signer.sign_tx(request).await.unwrap();
        assert!(!raw.is_empty());
        assert_ne!(address, Address::ZERO);
    }
}
