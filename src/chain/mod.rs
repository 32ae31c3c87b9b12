//! Typed JSON-RPC wrapper over the chain the Avantis exchange is deployed on
//! (C1). Retry/backoff against transient RPC errors is configured once, on
//! the underlying [`alloy::transports::layers::RetryBackoffLayer`]-wrapped
//! transport the caller builds the [`DynProvider`] from — 8 max retries, a
//! 250ms initial backoff per §4.1 — this module adds the paging discipline
//! and single-flight guard that sit above that layer.

use std::sync::Arc;

use alloy::{
    primitives::{Address, Bytes, TxHash},
    providers::{DynProvider, Provider},
    rpc::types::{Filter, Log, TransactionReceipt},
};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::ChainError;

/// Default maximum block span per `eth_getLogs` call (§6 `INDEXER_PAGE`).
pub const DEFAULT_PAGE_BLOCKS: u64 = 2000;

/// Suggested EIP-1559 fee inputs for C10's gas pricing (§4.8).
#[derive(Clone, Copy, Debug)]
pub struct FeeSuggestion {
    pub base_fee_per_gas: u128,
    pub priority_fee_per_gas: u128,
}

pub struct ChainClient {
    provider: DynProvider,
    exchange: Address,
    page: u64,
    /// Guards concurrent retries from stampeding the same `(from, to)` log
    /// range (§4.1).
    inflight: DashMap<(u64, u64), Arc<Mutex<()>>>,
}

impl ChainClient {
    pub fn new(provider: DynProvider, exchange: Address) -> Self {
        Self {
            provider,
            exchange,
            page: DEFAULT_PAGE_BLOCKS,
            inflight: DashMap::new(),
        }
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn exchange(&self) -> Address {
        self.exchange
    }

    pub async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    /// Fetches logs for `[from_block, to_block]`, split into `self.page`-sized
    /// spans. If the provider rejects a span as too large, bisect it and
    /// retry the halves (§4.1).
    pub async fn get_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError> {
        let mut out = Vec::new();
        let mut start = from_block;
        while start <= to_block {
            let end = (start + self.page - 1).min(to_block);
            out.extend(self.get_logs_span(start, end).await?);
            start = end + 1;
        }
        Ok(out)
    }

    async fn get_logs_span(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError> {
        let guard = self
            .inflight
            .entry((from_block, to_block))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _permit = guard.lock().await;

        let filter = Filter::new()
            .address(self.exchange)
            .from_block(from_block)
            .to_block(to_block);

        match self.provider.get_logs(&filter).await {
            Ok(logs) => {
                self.inflight.remove(&(from_block, to_block));
                Ok(logs)
            }
            Err(err) => {
                self.inflight.remove(&(from_block, to_block));
                let err = ChainError::from(err);
                if from_block < to_block && is_range_too_large(&err) {
                    let mid = from_block + (to_block - from_block) / 2;
                    let mut left = Box::pin(self.get_logs_span(from_block, mid)).await?;
                    let right = Box::pin(self.get_logs_span(mid + 1, to_block)).await?;
                    left.extend(right);
                    Ok(left)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }

    /// Pending nonce, per §4.8's "initialized from `get_nonce(address,
    /// \"pending\")`".
    pub async fn get_nonce(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ChainError> {
        let pending = self.provider.send_raw_transaction(&raw).await?;
        Ok(*pending.tx_hash())
    }

    pub async fn fee_history(&self) -> Result<FeeSuggestion, ChainError> {
        let fees = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| ChainError::Fatal(e.to_string()))?;
        Ok(FeeSuggestion {
            base_fee_per_gas: fees.max_fee_per_gas.saturating_sub(fees.max_priority_fee_per_gas),
            priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }
}

fn is_range_too_large(err: &ChainError) -> bool {
    matches!(err, ChainError::InvalidRequest(msg) if {
        let msg = msg.to_ascii_lowercase();
        msg.contains("too large") || msg.contains("more than") || msg.contains("limit")
    })
}
