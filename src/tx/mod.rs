//! Transaction orchestrator (C10): nonce allocation, EIP-1559 gas pricing,
//! broadcast, stuck-tx replacement, and receipt-confirm polling. Durable at
//! every state transition so a crash mid-flight resumes polling rather than
//! resubmitting (§4.8).

use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};

use crate::chain::{ChainClient, FeeSuggestion};
use crate::error::ChainError;
use crate::health::Metrics;
use crate::signer::{Signer, SignerError, TxRequest};
use crate::store::{SharedStore, TxIntentsRepo};
use crate::types::{ReasonCode, TxIntent, TxStatus};

#[derive(Clone, Copy, Debug)]
pub struct TxTunables {
    pub chain_id: u64,
    pub priority_fee_floor: u128,
    pub stuck_timeout_s: u64,
    pub max_replacements: u8,
    pub receipt_poll_interval_ms: u64,
    pub confirm_timeout_s: u64,
    pub finality_depth: u64,
}

impl Default for TxTunables {
    fn default() -> Self {
        Self {
            chain_id: 8453,
            priority_fee_floor: 100_000_000,
            stuck_timeout_s: 60,
            max_replacements: 3,
            receipt_poll_interval_ms: 1500,
            confirm_timeout_s: 180,
            finality_depth: 12,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error("nonce already used, intent dropped")]
    NonceAlreadyUsed,
    #[error("stuck after {0} replacements")]
    Stuck(u8),
}

/// Outcome of driving one intent through broadcast + confirm, for the
/// caller (fanout/exec pipeline) to fold back into `CopyIntent` status.
pub enum Outcome {
    Confirmed { tx_hash: TxHash },
    Failed { reason: ReasonCode },
}

pub struct TxOrchestrator<Si, Sh> {
    chain: std::sync::Arc<ChainClient>,
    signer: Si,
    shared: Sh,
    tx_repo: TxIntentsRepo,
    tunables: TxTunables,
    metrics: Metrics,
}

impl<Si: Signer, Sh: SharedStore> TxOrchestrator<Si, Sh> {
    pub fn new(
        chain: std::sync::Arc<ChainClient>,
        signer: Si,
        shared: Sh,
        tx_repo: TxIntentsRepo,
        tunables: TxTunables,
        metrics: Metrics,
    ) -> Self {
        Self { chain, signer, shared, tx_repo, tunables, metrics }
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// EIP-1559 fee pricing per §4.8: priority fee floored, max fee covers
    /// two base-fee doublings plus the priority tip.
    pub fn price_fees(&self, suggestion: FeeSuggestion) -> (u128, u128) {
        let priority = suggestion.priority_fee_per_gas.max(self.tunables.priority_fee_floor);
        let max_fee = 2 * suggestion.base_fee_per_gas + priority;
        (max_fee, priority)
    }

    /// Seeds the shared-store nonce counter from the chain's pending count;
    /// called once at boot, before any [`TxOrchestrator::next_nonce`] call
    /// (§4.8 "initialized from `get_nonce(address, \"pending\")`").
    pub async fn seed_nonce(&self) -> Result<(), TxError> {
        let addr = self.signer_address();
        let pending = self.chain.get_nonce(addr).await?;
        self.shared
            .reset_nonce(addr, pending)
            .await
            .map_err(|e| TxError::Chain(ChainError::Fatal(e.to_string())))
    }

    /// Allocates the next nonce for this signer, atomic-increment over the
    /// shared store (§5: "never derived from local counters").
    pub async fn next_nonce(&self) -> Result<u64, TxError> {
        self.shared
            .next_nonce(self.signer_address())
            .await
            .map_err(|e| TxError::Chain(ChainError::Fatal(e.to_string())))
    }

    /// Builds, signs, and broadcasts one `TxIntent`, persisting each state
    /// transition before the next action (§4.8 "Persistence").
    pub async fn submit(&self, mut tx: TxIntent) -> Result<TxIntent, TxError> {
        self.metrics.tx_attempts_total.inc();
        tx.status = TxStatus::Signed;
        let request = TxRequest {
            chain_id: self.tunables.chain_id,
            nonce: tx.nonce,
            to: tx.to,
            data: tx.data.clone(),
            value: tx.value,
            gas_limit: tx.gas_limit,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        };
        let raw = self.signer.sign_tx(request).await?;
        tx.id = Some(self.tx_repo.upsert(&tx).await?);

        match self.chain.send_raw_transaction(raw).await {
            Ok(hash) => {
                tx.tx_hash = Some(hash);
                tx.status = TxStatus::Broadcast;
                self.tx_repo.upsert(&tx).await?;
                Ok(tx)
            }
            Err(err) => self.handle_broadcast_error(tx, err).await,
        }
    }

    async fn handle_broadcast_error(&self, mut tx: TxIntent, err: ChainError) -> Result<TxIntent, TxError> {
        let msg = err.to_string().to_ascii_lowercase();
        if msg.contains("nonce too low") {
            let resynced = self.chain.get_nonce(self.signer_address()).await.unwrap_or(tx.nonce);
            self.shared
                .reset_nonce(self.signer_address(), resynced)
                .await
                .map_err(|e| TxError::Chain(ChainError::Fatal(e.to_string())))?;
            tx.nonce = resynced;
            Box::pin(self.submit(tx)).await
        } else if msg.contains("nonce already used") || msg.contains("already known") {
            tx.status = TxStatus::Dropped;
            self.tx_repo.upsert(&tx).await?;
            Err(TxError::NonceAlreadyUsed)
        } else {
            Err(TxError::Chain(err))
        }
    }

    /// Polls for a receipt, bumping fees on a replacement once
    /// `stuck_timeout_s` has elapsed with no receipt, up to
    /// `max_replacements` times, then confirming once `finality_depth`
    /// confirmations have accrued (§4.8).
    pub async fn confirm(&self, mut tx: TxIntent) -> Result<Outcome, TxError> {
        let started_at = tokio::time::Instant::now();
        let deadline = started_at + Duration::from_secs(self.tunables.confirm_timeout_s);
        let mut last_bump = tokio::time::Instant::now();

        loop {
            if tokio::time::Instant::now() >= deadline {
                tx.status = TxStatus::Dropped;
                self.tx_repo.upsert(&tx).await?;
                return Ok(Outcome::Failed { reason: ReasonCode::Stuck });
            }

            let Some(hash) = tx.tx_hash else {
                return Ok(Outcome::Failed { reason: ReasonCode::Reverted });
            };

            if let Some(receipt) = self.chain.get_transaction_receipt(hash).await? {
                let latest = self.chain.latest_block().await?;
                let confirmations = latest.saturating_sub(receipt.block_number.unwrap_or(latest));
                if confirmations < self.tunables.finality_depth {
                    tokio::time::sleep(Duration::from_millis(self.tunables.receipt_poll_interval_ms)).await;
                    continue;
                }

                tx.receipt_block = receipt.block_number;
                tx.receipt_gas_used = Some(receipt.gas_used as u64);
                tx.status = if receipt.status() { TxStatus::MinedOk } else { TxStatus::MinedFail };
                self.tx_repo.upsert(&tx).await?;

                if receipt.status() {
                    self.metrics.tx_confirm_latency_seconds.observe(started_at.elapsed().as_secs_f64());
                    return Ok(Outcome::Confirmed { tx_hash: hash });
                }
                return Ok(Outcome::Failed { reason: ReasonCode::Reverted });
            }

            if last_bump.elapsed() >= Duration::from_secs(self.tunables.stuck_timeout_s) {
                if tx.attempts >= self.tunables.max_replacements {
                    tx.status = TxStatus::Dropped;
                    self.tx_repo.upsert(&tx).await?;
                    return Ok(Outcome::Failed { reason: ReasonCode::Stuck });
                }
                tx.bump_fees(12);
                tx = self.submit(tx).await?;
                last_bump = tokio::time::Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(self.tunables.receipt_poll_interval_ms)).await;
        }
    }
}

/// Builds a fresh `TxIntent` shell from the orchestrator's nonce and gas
/// pricing, ready to hand to [`TxOrchestrator::submit`].
pub fn build_tx_intent(
    intent_id: ulid::Ulid,
    nonce: u64,
    to: Address,
    data: Bytes,
    value: U256,
    gas_limit: u64,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
) -> TxIntent {
    TxIntent::new(intent_id, nonce, to, data, value, gas_limit, max_fee_per_gas, max_priority_fee_per_gas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_pricing_floors_priority_and_doubles_base() {
        let tunables = TxTunables::default();
        let orchestrator_price = |base: u128, suggested_priority: u128| -> (u128, u128) {
            let priority = suggested_priority.max(tunables.priority_fee_floor);
            let max_fee = 2 * base + priority;
            (max_fee, priority)
        };
        let (max_fee, priority) = orchestrator_price(1_000_000_000, 10_000_000);
        assert_eq!(priority, tunables.priority_fee_floor);
        assert_eq!(max_fee, 2_000_000_000 + tunables.priority_fee_floor);
    }
}
