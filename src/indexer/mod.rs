//! Indexer (C2): keeps `fills` and the cursor a faithful, reorg-safe
//! projection of the exchange's trade event log. Everything downstream —
//! PnL, the leaderboard, fanout — only ever reads committed rows, never the
//! chain directly, so this is the sole boundary between on-chain state and
//! settled fact (§4.2).

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy::{
    primitives::B256,
    rpc::types::Log,
    sol_types::SolEventInterface,
};
use dashmap::DashMap;
use tokio::sync::{OnceCell, broadcast};
use tracing::{info, warn};

use crate::abi::dex::Exchange::{ExchangeEvents, ExchangeInstance};
use crate::chain::ChainClient;
use crate::error::{ChainError, CoreError};
use crate::health::Metrics;
use crate::num::Converter;
use crate::store::pg::{Cursor, PgStore};
use crate::types::{Fill, FillSide, PairId};

/// How far back of `latest_block` backfill starts when no cursor exists yet
/// (§4.2, §6 `INDEXER_BACKFILL_RANGE`).
pub const DEFAULT_BACKFILL_RANGE: u64 = 50_000;

/// `latest_block - last_seen_block` beyond which a `Lagging` alert fires
/// (§4.2, §6 `INDEXER_ALARM_THRESHOLD`).
pub const DEFAULT_ALARM_THRESHOLD: u64 = 50;

#[derive(Clone, Copy, Debug)]
pub struct IndexerTunables {
    pub backfill_range: u64,
    pub finality_depth: u64,
    pub sleep_ws: Duration,
    pub sleep_http: Duration,
    pub alarm_threshold: u64,
}

impl Default for IndexerTunables {
    fn default() -> Self {
        Self {
            backfill_range: DEFAULT_BACKFILL_RANGE,
            finality_depth: 12,
            sleep_ws: Duration::from_secs(2),
            sleep_http: Duration::from_secs(5),
            alarm_threshold: DEFAULT_ALARM_THRESHOLD,
        }
    }
}

/// Out-of-band signals for C11's readiness/health surface; processing
/// continues regardless of whether anyone is listening (§4.2 "does not stop
/// processing").
#[derive(Clone, Debug)]
pub enum IndexerAlert {
    /// Emitted once per loop tick regardless of lag — the liveness heartbeat
    /// C11's readiness surface reads block-observed and lag from.
    Progress { last_seen_block: u64, latest_block: u64 },
    Lagging { last_seen_block: u64, latest_block: u64 },
    Reorg { reorg_point: u64, discarded_through: u64 },
}

pub struct Indexer {
    chain: Arc<ChainClient>,
    chain_id: u64,
    store: PgStore,
    tunables: IndexerTunables,
    alerts: broadcast::Sender<IndexerAlert>,
    metrics: Metrics,
    collateral_decimals: OnceCell<u8>,
    pair_price_decimals: DashMap<PairId, u8>,
    /// Block hashes of the most recently processed blocks, within one
    /// finality window, used to detect a reorg on the next range fetch
    /// (§4.2 "re-query block hashes... and compare").
    seen_hashes: Mutex<BTreeMap<u64, B256>>,
}

impl Indexer {
    pub fn new(
        chain: Arc<ChainClient>,
        chain_id: u64,
        store: PgStore,
        tunables: IndexerTunables,
        metrics: Metrics,
    ) -> (Self, broadcast::Receiver<IndexerAlert>) {
        let (tx, rx) = broadcast::channel(64);
        (
            Self {
                chain,
                chain_id,
                store,
                tunables,
                alerts: tx,
                metrics,
                collateral_decimals: OnceCell::new(),
                pair_price_decimals: DashMap::new(),
                seen_hashes: Mutex::new(BTreeMap::new()),
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerAlert> {
        self.alerts.subscribe()
    }

    /// Confirms the deployed contract decodes against the interface this
    /// crate knows about before touching any state; there is no partial or
    /// best-effort schema (§4.2 "refuse to start if the schema lookup
    /// fails").
    pub async fn ensure_schema(&self) -> Result<(), CoreError> {
        let instance = ExchangeInstance::new(self.chain.exchange(), self.chain.provider().clone());
        instance
            .isHalted()
            .call()
            .await
            .map_err(|e| CoreError::Chain(ChainError::from(e)))?;
        Ok(())
    }

    async fn collateral_decimals(&self) -> Result<u8, ChainError> {
        self.collateral_decimals
            .get_or_try_init(|| async {
                let instance = ExchangeInstance::new(self.chain.exchange(), self.chain.provider().clone());
                instance
                    .collateralDecimals()
                    .call()
                    .await
                    .map_err(ChainError::from)
            })
            .await
            .map(|v| *v)
    }

    async fn price_decimals(&self, pair_id: PairId) -> Result<u8, ChainError> {
        if let Some(cached) = self.pair_price_decimals.get(&pair_id) {
            return Ok(*cached);
        }
        let instance = ExchangeInstance::new(self.chain.exchange(), self.chain.provider().clone());
        let decimals = instance
            .getPairDecimals(pair_id)
            .call()
            .await
            .map_err(ChainError::from)?;
        self.pair_price_decimals.insert(pair_id, decimals.priceDecimals);
        Ok(decimals.priceDecimals)
    }

    /// Decodes one log into a normalized [`Fill`], or `None` for logs the
    /// exchange emits that aren't trade events.
    async fn fill_from_log(&self, log: &Log) -> Result<Option<Fill>, CoreError> {
        let decoded = match ExchangeEvents::decode_log(&log.inner) {
            Ok(d) => d,
            Err(e) => return Err(CoreError::Chain(ChainError::Fatal(e.to_string()))),
        };
        let tx_hash = log.transaction_hash.unwrap_or_default();
        let log_index = log.log_index.unwrap_or_default() as u32;
        let block_number = log.block_number.unwrap_or_default();
        let block_timestamp = log.block_timestamp.unwrap_or_default();

        let collateral_conv = Converter::new(self.collateral_decimals().await?);

        let fill = match decoded.data {
            ExchangeEvents::TradeOpened(ev) => {
                let price_conv = Converter::new(self.price_decimals(ev.pairId).await?);
                Fill {
                    id: None,
                    chain_tx_hash: tx_hash,
                    log_index,
                    block_number,
                    block_timestamp,
                    trader_address: ev.trader,
                    pair_id: ev.pairId,
                    is_long: ev.isLong,
                    side: FillSide::Open,
                    size_usd: collateral_conv.from_unsigned(ev.sizeUsd),
                    price: price_conv.from_unsigned(ev.price),
                    fee_usd: collateral_conv.from_unsigned(ev.fee),
                    leverage_bps: ev.leverageBps,
                }
            }
            ExchangeEvents::TradeClosed(ev) => {
                let price_conv = Converter::new(self.price_decimals(ev.pairId).await?);
                Fill {
                    id: None,
                    chain_tx_hash: tx_hash,
                    log_index,
                    block_number,
                    block_timestamp,
                    trader_address: ev.trader,
                    pair_id: ev.pairId,
                    is_long: ev.isLong,
                    side: FillSide::Close,
                    size_usd: collateral_conv.from_unsigned(ev.sizeUsd),
                    price: price_conv.from_unsigned(ev.price),
                    fee_usd: collateral_conv.from_unsigned(ev.fee),
                    leverage_bps: 0,
                }
            }
            ExchangeEvents::Liquidated(ev) => {
                let price_conv = Converter::new(self.price_decimals(ev.pairId).await?);
                Fill {
                    id: None,
                    chain_tx_hash: tx_hash,
                    log_index,
                    block_number,
                    block_timestamp,
                    trader_address: ev.trader,
                    pair_id: ev.pairId,
                    is_long: ev.isLong,
                    side: FillSide::Liquidation,
                    size_usd: collateral_conv.from_unsigned(ev.sizeUsd),
                    price: price_conv.from_unsigned(ev.price),
                    fee_usd: collateral_conv.from_unsigned(ev.fee),
                    leverage_bps: 0,
                }
            }
        };
        Ok(Some(fill))
    }

    async fn load_or_seed_cursor(&self) -> Result<Cursor, CoreError> {
        if let Some(cursor) = self.store.cursor().load(self.chain_id).await? {
            return Ok(cursor);
        }
        let latest = self.chain.latest_block().await?;
        let start = latest.saturating_sub(self.tunables.backfill_range);
        Ok(Cursor {
            last_safe_block: start.saturating_sub(1),
            last_seen_block: start.saturating_sub(1),
            schema_version: 1,
        })
    }

    /// Processes `[from, to]`: fetches logs, checks for a reorg against the
    /// previously observed hashes in the overlap window, decodes fills, and
    /// commits everything atomically (§4.2 backfill/tail/reorg/atomicity).
    async fn process_range(&self, cursor: Cursor, from: u64, to: u64) -> Result<Cursor, CoreError> {
        let logs = self.chain.get_logs(from, to).await?;

        let mut block_hashes: BTreeMap<u64, B256> = BTreeMap::new();
        for log in &logs {
            if let (Some(n), Some(h)) = (log.block_number, log.block_hash) {
                block_hashes.entry(n).or_insert(h);
            }
        }

        let reorg_point = {
            let seen = self.seen_hashes.lock().unwrap();
            detect_reorg(&seen, &block_hashes)
        };

        let mut fills = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.fill_from_log(log).await {
                Ok(Some(fill)) => fills.push(fill),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        tx_hash = %log.transaction_hash.unwrap_or_default(),
                        log_index = log.log_index.unwrap_or_default(),
                        error = %err,
                        "quarantining undecodable log"
                    );
                    self.store
                        .quarantine()
                        .insert(&crate::store::pg::QuarantinedLog {
                            chain_tx_hash: log.transaction_hash.unwrap_or_default(),
                            log_index: log.log_index.unwrap_or_default() as u32,
                            block_number: log.block_number.unwrap_or_default(),
                            raw_topics: log.inner.data.topics().iter().map(|t| t.to_string()).collect(),
                            raw_data: log.inner.data.data().to_string(),
                            error: err.to_string(),
                            acknowledged: false,
                            created_at: chrono::Utc::now(),
                        })
                        .await?;
                }
            }
        }

        let mut new_cursor = if let Some(point) = reorg_point {
            warn!(reorg_point = point, discarded_through = to, "reorg detected, rolling back");
            let _ = self.alerts.send(IndexerAlert::Reorg { reorg_point: point, discarded_through: to });
            let last_safe = point.min(to.saturating_sub(self.tunables.finality_depth));
            Cursor { last_safe_block: last_safe, last_seen_block: point, schema_version: cursor.schema_version }
        } else {
            let last_safe = to.saturating_sub(self.tunables.finality_depth).min(to);
            Cursor { last_safe_block: last_safe, last_seen_block: to, schema_version: cursor.schema_version }
        };

        if self.store.quarantine().has_unacknowledged_below(new_cursor.last_safe_block).await? {
            if let Some(oldest) = self.store.quarantine().oldest_unacknowledged_block().await? {
                let clamp = oldest.saturating_sub(1);
                warn!(clamp, oldest_unacknowledged_block = oldest, "clamping cursor at unacknowledged quarantine entry");
                new_cursor.last_safe_block = new_cursor.last_safe_block.min(clamp).max(cursor.last_safe_block);
                new_cursor.last_seen_block = new_cursor.last_seen_block.min(clamp).max(cursor.last_seen_block);
            }
        }

        self.store
            .commit_indexer_batch(self.chain_id, &fills, reorg_point, new_cursor)
            .await?;

        self.metrics.indexer_blocks_total.inc_by(to.saturating_sub(from) + 1);
        self.metrics.fills_total.inc_by(fills.len() as u64);

        {
            let mut seen = self.seen_hashes.lock().unwrap();
            if let Some(point) = reorg_point {
                seen.retain(|&block, _| block <= point);
            }
            for (block, hash) in block_hashes {
                seen.insert(block, hash);
            }
            let floor = new_cursor.last_seen_block.saturating_sub(self.tunables.finality_depth * 2);
            seen.retain(|&block, _| block >= floor);
        }

        Ok(new_cursor)
    }

    fn check_lag(&self, last_seen: u64, latest: u64) {
        let behind = latest.saturating_sub(last_seen);
        let _ = self.alerts.send(IndexerAlert::Progress { last_seen_block: last_seen, latest_block: latest });
        if behind > self.tunables.alarm_threshold {
            let _ = self.alerts.send(IndexerAlert::Lagging { last_seen_block: last_seen, latest_block: latest });
        }
    }

    /// Drives backfill then tail, forever. The caller (the service's main
    /// task) decides how to cancel this — e.g. aborting the spawned task on
    /// shutdown — rather than this loop owning that policy.
    pub async fn run(&self) -> Result<(), CoreError> {
        self.ensure_schema().await?;
        let mut cursor = self.load_or_seed_cursor().await?;
        info!(last_seen_block = cursor.last_seen_block, "indexer starting");

        loop {
            let latest = self.chain.latest_block().await?;
            if latest <= cursor.last_seen_block {
                self.check_lag(cursor.last_seen_block, latest);
                tokio::time::sleep(self.tunables.sleep_http).await;
                continue;
            }

            let from = cursor.last_seen_block + 1;
            cursor = self.process_range(cursor, from, latest).await?;
            self.check_lag(cursor.last_seen_block, latest);

            let gap_to_head = latest.saturating_sub(cursor.last_seen_block);
            let sleep_for = if gap_to_head <= self.tunables.finality_depth {
                self.tunables.sleep_ws
            } else {
                Duration::from_millis(50)
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}

/// Pure comparison: the lowest block whose freshly observed hash disagrees
/// with what was previously recorded, minus one — the common ancestor. `None`
/// means no reorg in the overlap.
fn detect_reorg(seen: &BTreeMap<u64, B256>, fresh: &BTreeMap<u64, B256>) -> Option<u64> {
    for (block, hash) in fresh {
        if let Some(prior) = seen.get(block) {
            if prior != hash {
                return Some(block.saturating_sub(1));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn no_overlap_is_not_a_reorg() {
        let seen = BTreeMap::new();
        let mut fresh = BTreeMap::new();
        fresh.insert(100, hash(1));
        assert_eq!(detect_reorg(&seen, &fresh), None);
    }

    #[test]
    fn matching_hashes_in_overlap_is_not_a_reorg() {
        let mut seen = BTreeMap::new();
        seen.insert(100, hash(1));
        let mut fresh = BTreeMap::new();
        fresh.insert(100, hash(1));
        assert_eq!(detect_reorg(&seen, &fresh), None);
    }

    #[test]
    fn diverging_hash_reports_common_ancestor() {
        let mut seen = BTreeMap::new();
        seen.insert(100, hash(1));
        seen.insert(101, hash(2));
        let mut fresh = BTreeMap::new();
        fresh.insert(100, hash(1));
        fresh.insert(101, hash(9));
        assert_eq!(detect_reorg(&seen, &fresh), Some(100));
    }

    #[test]
    fn cursor_invariant_never_advances_past_finality_window() {
        let last_seen = 1000u64;
        let finality_depth = 12u64;
        let last_safe = last_seen.min(last_seen.saturating_sub(finality_depth));
        assert_eq!(last_safe, 988);
    }
}
