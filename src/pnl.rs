//! FIFO position/PnL engine (C4). Pure logic — no I/O — so it can be driven
//! identically by the live fills stream and by a full replay from the
//! `fills` table (§8 property 4, "PnL rebuildability").

use std::collections::{HashMap, VecDeque};

use alloy::primitives::Address;
use fastnum::{D256, UD64, dec256, decimal::Context, udec64};

use crate::types::{Fill, FillId, FillSide, PairId};

const WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// `UD64` and `D256` are distinct fixed-width decimal types with no direct
/// lossless conversion; PnL math needs a signed type to carry losses, so
/// values cross the boundary through their canonical decimal string.
fn signed(v: UD64) -> D256 {
    D256::from_str(&v.to_string(), Context::default()).unwrap_or(dec256!(0))
}

fn unsigned_or_zero(v: D256) -> UD64 {
    if v.is_negative() {
        return udec64!(0);
    }
    UD64::from_str(&v.to_string(), Context::default()).unwrap_or(udec64!(0))
}

/// One open FIFO lot (§3 `PositionLot`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lot {
    pub remaining: UD64,
    pub entry_price: UD64,
    pub entry_ts: u64,
    pub source_fill_id: FillId,
}

/// One realized match produced by closing against an open lot.
#[derive(Clone, Copy, Debug)]
pub struct Match {
    pub matched_size: UD64,
    pub entry_price: UD64,
    pub exit_price: UD64,
    pub realized_pnl: D256,
    pub fee: UD64,
}

/// Result of applying one fill: the matches it produced (empty for OPEN
/// fills) and the residual size that couldn't be matched against any open
/// lot (§4.3: "silently dropped" as an anomaly when the open queue predates
/// the indexer).
#[derive(Clone, Debug, Default)]
pub struct ApplyOutcome {
    pub matches: Vec<Match>,
    pub unmatched_residual: UD64,
}

#[derive(Clone, Debug, Default)]
struct TradeSample {
    ts: u64,
    notional: UD64,
    pnl: D256,
    /// Whether this sample came from a CLOSE/LIQUIDATION fill — only these
    /// enter the win/loss population (§4.3: "each CLOSE contributes one
    /// win/loss sample weighted by matched notional"). OPEN fills still
    /// count toward volume and trade count.
    is_closing: bool,
}

/// Rolling, incrementally maintained 30-day aggregate for one trader (§3
/// `TraderStats30d`).
#[derive(Clone, Debug)]
pub struct TraderStats {
    pub last_trade_ts: u64,
    samples: VecDeque<TradeSample>,
}

impl Default for TraderStats {
    fn default() -> Self {
        Self {
            last_trade_ts: 0,
            samples: VecDeque::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TraderStatsSnapshot {
    pub last_trade_ts: u64,
    pub trade_count_30d: u64,
    pub volume_usd_30d: UD64,
    pub realized_pnl_30d: D256,
    pub win_rate_30d: f64,
    pub median_trade_usd_30d: UD64,
    pub max_drawdown_30d: UD64,
}

impl TraderStats {
    fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(WINDOW_SECS);
        while matches!(self.samples.front(), Some(s) if s.ts < cutoff) {
            self.samples.pop_front();
        }
    }

    fn record(&mut self, ts: u64, notional: UD64, pnl: D256, is_closing: bool) {
        self.last_trade_ts = self.last_trade_ts.max(ts);
        self.samples.push_back(TradeSample { ts, notional, pnl, is_closing });
        self.prune(ts);
    }

    /// Snapshot over the current 30-day window. `win_rate_30d` is weighted by
    /// matched notional, per §4.3.
    pub fn snapshot(&self) -> TraderStatsSnapshot {
        if self.samples.is_empty() {
            return TraderStatsSnapshot::default();
        }
        let mut volume = udec64!(0);
        let mut realized = dec256!(0);
        let mut win_notional = udec64!(0);
        let mut total_notional = udec64!(0);
        let mut cumulative = dec256!(0);
        let mut peak = dec256!(0);
        let mut max_drawdown = udec64!(0);
        let mut sizes: Vec<UD64> = Vec::with_capacity(self.samples.len());

        for sample in &self.samples {
            volume += sample.notional;
            realized += sample.pnl;
            if sample.is_closing {
                total_notional += sample.notional;
                if sample.pnl.is_positive() {
                    win_notional += sample.notional;
                }
            }
            cumulative += sample.pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let drawdown = peak - cumulative;
            if drawdown.is_positive() {
                let drawdown_ud = unsigned_or_zero(drawdown);
                if drawdown_ud > max_drawdown {
                    max_drawdown = drawdown_ud;
                }
            }
            sizes.push(sample.notional);
        }

        sizes.sort();
        let median = sizes[sizes.len() / 2];

        let win_rate = if total_notional.is_zero() {
            0.0
        } else {
            (win_notional / total_notional).to_string().parse().unwrap_or(0.0)
        };

        TraderStatsSnapshot {
            last_trade_ts: self.last_trade_ts,
            trade_count_30d: self.samples.len() as u64,
            volume_usd_30d: volume,
            realized_pnl_30d: realized,
            win_rate_30d: win_rate,
            median_trade_usd_30d: median,
            max_drawdown_30d: max_drawdown,
        }
    }
}

/// The engine proper: one instance owns all open lots and rolling stats. A
/// single writer per process, per §5's concurrency model.
#[derive(Default)]
pub struct PnlEngine {
    lots: HashMap<(Address, PairId, bool), VecDeque<Lot>>,
    stats: HashMap<Address, TraderStats>,
}

impl PnlEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats_for(&self, trader: Address) -> TraderStatsSnapshot {
        self.stats.get(&trader).map(|s| s.snapshot()).unwrap_or_default()
    }

    /// Consumes one fill in cursor order, mutating open lots and the rolling
    /// stats for its trader (§4.3's "update protocol").
    pub fn apply(&mut self, fill: &Fill) -> ApplyOutcome {
        let key = (fill.trader_address, fill.pair_id, fill.is_long);
        let outcome = match fill.side {
            FillSide::Open => {
                self.lots.entry(key).or_default().push_back(Lot {
                    remaining: fill.size_usd,
                    entry_price: fill.price,
                    entry_ts: fill.block_timestamp,
                    source_fill_id: fill.id.unwrap_or_default(),
                });
                ApplyOutcome::default()
            }
            FillSide::Close | FillSide::Liquidation => self.close_against(key, fill),
        };

        let direction_notional = fill.size_usd - outcome.unmatched_residual;
        if !direction_notional.is_zero() || matches!(fill.side, FillSide::Open) {
            let realized: D256 = outcome
                .matches
                .iter()
                .fold(dec256!(0), |acc, m| acc + m.realized_pnl);
            let notional = if matches!(fill.side, FillSide::Open) {
                fill.size_usd
            } else {
                direction_notional
            };
            let is_closing = matches!(fill.side, FillSide::Close | FillSide::Liquidation);
            self.stats
                .entry(fill.trader_address)
                .or_default()
                .record(fill.block_timestamp, notional, realized, is_closing);
        }

        outcome
    }

    /// Pops from the head of the opposing queue, matching up to the close
    /// size (§4.3). Residual beyond the open queue is reported, not
    /// fabricated.
    fn close_against(&mut self, key: (Address, PairId, bool), fill: &Fill) -> ApplyOutcome {
        let direction_sign: D256 = if key.2 { dec256!(1) } else { dec256!(-1) };
        let mut remaining_to_close = fill.size_usd;
        let mut matches = Vec::new();

        if let Some(queue) = self.lots.get_mut(&key) {
            while !remaining_to_close.is_zero() {
                let Some(lot) = queue.front_mut() else { break };
                let matched = remaining_to_close.min(lot.remaining);
                let fee_share = if fill.size_usd.is_zero() {
                    udec64!(0)
                } else {
                    fill.fee_usd * matched / fill.size_usd
                };
                let price_delta_pct =
                    (signed(fill.price) - signed(lot.entry_price)) / signed(lot.entry_price);
                let pnl = signed(matched) * price_delta_pct * direction_sign - signed(fee_share);

                matches.push(Match {
                    matched_size: matched,
                    entry_price: lot.entry_price,
                    exit_price: fill.price,
                    realized_pnl: pnl,
                    fee: fee_share,
                });

                lot.remaining -= matched;
                remaining_to_close -= matched;
                if lot.remaining.is_zero() {
                    queue.pop_front();
                }
            }
            if queue.is_empty() {
                self.lots.remove(&key);
            }
        }

        ApplyOutcome {
            matches,
            unmatched_residual: remaining_to_close,
        }
    }

    /// Total open notional across all traders/pairs/directions — used for
    /// the FIFO conservation invariant in tests (§8 property 3).
    #[cfg(test)]
    fn total_open_notional(&self) -> UD64 {
        self.lots
            .values()
            .flat_map(|q| q.iter())
            .fold(udec64!(0), |acc, lot| acc + lot.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{TxHash, address};

    fn open(trader: alloy::primitives::Address, pair: PairId, is_long: bool, size: UD64, price: UD64, ts: u64, log_index: u32) -> Fill {
        Fill {
            id: Some(log_index as i64),
            chain_tx_hash: TxHash::ZERO,
            log_index,
            block_number: 100 + log_index as u64,
            block_timestamp: ts,
            trader_address: trader,
            pair_id: pair,
            is_long,
            side: FillSide::Open,
            size_usd: size,
            price,
            fee_usd: udec64!(0),
            leverage_bps: 50_000,
        }
    }

    fn close(trader: alloy::primitives::Address, pair: PairId, is_long: bool, size: UD64, price: UD64, ts: u64, log_index: u32) -> Fill {
        let mut f = open(trader, pair, is_long, size, price, ts, log_index);
        f.side = FillSide::Close;
        f
    }

    #[test]
    fn fifo_conservation_holds_after_partial_close() {
        let trader = address!("0x00000000000000000000000000000000000005");
        let mut engine = PnlEngine::new();
        engine.apply(&open(trader, 1, true, udec64!(1000), udec64!(2000), 1, 0));
        engine.apply(&open(trader, 1, true, udec64!(500), udec64!(2100), 2, 1));
        let outcome = engine.apply(&close(trader, 1, true, udec64!(700), udec64!(2200), 3, 2));

        assert_eq!(outcome.unmatched_residual, udec64!(0));
        assert_eq!(engine.total_open_notional(), udec64!(800));
    }

    #[test]
    fn close_profit_long_is_positive() {
        let trader = address!("0x00000000000000000000000000000000000006");
        let mut engine = PnlEngine::new();
        engine.apply(&open(trader, 1, true, udec64!(1000), udec64!(2000), 1, 0));
        let outcome = engine.apply(&close(trader, 1, true, udec64!(1000), udec64!(2200), 2, 1));

        assert_eq!(outcome.matches.len(), 1);
        assert!(outcome.matches[0].realized_pnl.is_positive());
    }

    #[test]
    fn close_exceeding_open_queue_reports_residual() {
        let trader = address!("0x00000000000000000000000000000000000007");
        let mut engine = PnlEngine::new();
        engine.apply(&open(trader, 1, true, udec64!(500), udec64!(2000), 1, 0));
        let outcome = engine.apply(&close(trader, 1, true, udec64!(800), udec64!(2100), 2, 1));

        assert_eq!(outcome.unmatched_residual, udec64!(300));
        assert_eq!(engine.total_open_notional(), udec64!(0));
    }

    #[test]
    fn stats_rebuild_from_empty_matches_incremental() {
        let trader = address!("0x00000000000000000000000000000000000008");
        let fills = vec![
            open(trader, 1, true, udec64!(1000), udec64!(2000), 1, 0),
            close(trader, 1, true, udec64!(1000), udec64!(2100), 2, 1),
            open(trader, 2, false, udec64!(500), udec64!(30), 3, 2),
            close(trader, 2, false, udec64!(500), udec64!(28), 4, 3),
        ];

        let mut incremental = PnlEngine::new();
        for f in &fills {
            incremental.apply(f);
        }

        let mut rebuilt = PnlEngine::new();
        for f in &fills {
            rebuilt.apply(f);
        }

        assert_eq!(
            incremental.stats_for(trader).realized_pnl_30d,
            rebuilt.stats_for(trader).realized_pnl_30d
        );
    }
}
