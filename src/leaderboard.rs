//! Copyability leaderboard (C5): eligibility filter, deterministic scoring,
//! and a periodically refreshed, atomically replaced read cache.

use std::sync::{Arc, RwLock};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use crate::pnl::TraderStatsSnapshot;

/// Tunable scoring weights (§4.4). Configured constants, not derived —
/// kept as boot-time config so weighting can be retuned without a redeploy.
#[derive(Clone, Copy, Debug)]
pub struct ScoreWeights {
    pub volume: f64,
    pub win_rate: f64,
    pub sharpe_like: f64,
    pub max_drawdown: f64,
    pub leverage_variance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            volume: 1.0,
            win_rate: 1.0,
            sharpe_like: 1.5,
            max_drawdown: 1.0,
            leverage_variance: 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EligibilityThresholds {
    pub active_hours: i64,
    pub min_trades_30d: u64,
    pub min_volume_30d_usd: f64,
}

impl Default for EligibilityThresholds {
    fn default() -> Self {
        Self {
            active_hours: 72,
            min_trades_30d: 300,
            min_volume_30d_usd: 10_000_000.0,
        }
    }
}

/// Raw per-trader inputs the scorer needs, beyond what `TraderStatsSnapshot`
/// already carries (population mean/stddev for z-scoring and leverage
/// variance, which are cross-trader statistics).
#[derive(Clone, Debug)]
pub struct TraderInputs {
    pub trader_address: Address,
    pub stats: TraderStatsSnapshot,
    pub stddev_daily_pnl: f64,
    pub leverage_variance: f64,
}

#[derive(Clone, Debug)]
pub struct LeaderboardEntry {
    pub trader_address: Address,
    pub score: f64,
    pub volume_usd_30d: f64,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn zscore(values: &[f64], i: usize) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        0.0
    } else {
        (values[i] - mean) / stddev
    }
}

fn to_f64(v: fastnum::UD64) -> f64 {
    v.to_string().parse().unwrap_or(0.0)
}

/// Eligibility filter (§4.4): all three must hold.
pub fn is_eligible(inputs: &TraderInputs, thresholds: &EligibilityThresholds, now: DateTime<Utc>) -> bool {
    let last_trade = DateTime::<Utc>::from_timestamp(inputs.stats.last_trade_ts as i64, 0)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let active = now.signed_duration_since(last_trade).num_hours() <= thresholds.active_hours;
    active
        && inputs.stats.trade_count_30d >= thresholds.min_trades_30d
        && to_f64(inputs.stats.volume_usd_30d) >= thresholds.min_volume_30d_usd
}

const EPSILON: f64 = 1e-9;

/// Deterministic: identical inputs produce an identical score to within the
/// floating-point tolerance required by §8 property 10.
pub fn score_all(inputs: &[TraderInputs], weights: &ScoreWeights) -> Vec<LeaderboardEntry> {
    let volumes: Vec<f64> = inputs.iter().map(|i| to_f64(i.stats.volume_usd_30d)).collect();
    let win_rates: Vec<f64> = inputs.iter().map(|i| i.stats.win_rate_30d).collect();
    let sharpe_likes: Vec<f64> = inputs
        .iter()
        .map(|i| {
            let pnl: f64 = i.stats.realized_pnl_30d.to_string().parse().unwrap_or(0.0);
            pnl / (i.stddev_daily_pnl + EPSILON)
        })
        .collect();
    let drawdowns: Vec<f64> = inputs.iter().map(|i| to_f64(i.stats.max_drawdown_30d)).collect();
    let leverage_vars: Vec<f64> = inputs.iter().map(|i| i.leverage_variance).collect();

    inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let raw = weights.volume * zscore(&volumes, i) + weights.win_rate * zscore(&win_rates, i)
                + weights.sharpe_like * zscore(&sharpe_likes, i)
                - weights.max_drawdown * zscore(&drawdowns, i)
                - weights.leverage_variance * zscore(&leverage_vars, i);
            LeaderboardEntry {
                trader_address: input.trader_address,
                score: (100.0 * sigmoid(raw)).clamp(0.0, 100.0),
                volume_usd_30d: volumes[i],
            }
        })
        .collect()
}

/// Sort by score desc, tie-break by volume desc, then address asc for a
/// stable ranking (§4.4).
pub fn rank(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.volume_usd_30d.partial_cmp(&a.volume_usd_30d).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.trader_address.cmp(&b.trader_address))
    });
    entries
}

/// Atomically replaceable read cache (§4.4: "Writes to the cache are atomic
/// replace").
#[derive(Clone, Default)]
pub struct LeaderboardCache {
    inner: Arc<RwLock<CachedSnapshot>>,
}

#[derive(Clone, Default)]
struct CachedSnapshot {
    entries: Vec<LeaderboardEntry>,
    computed_at: Option<DateTime<Utc>>,
}

impl LeaderboardCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, entries: Vec<LeaderboardEntry>, computed_at: DateTime<Utc>) {
        let mut guard = self.inner.write().expect("leaderboard cache lock poisoned");
        guard.entries = entries;
        guard.computed_at = Some(computed_at);
    }

    pub fn top_n(&self, n: usize) -> Vec<LeaderboardEntry> {
        let guard = self.inner.read().expect("leaderboard cache lock poisoned");
        guard.entries.iter().take(n).cloned().collect()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let guard = self.inner.read().expect("leaderboard cache lock poisoned");
        guard.computed_at.map(|t| now.signed_duration_since(t))
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        match self.age(now) {
            Some(age) => age.num_seconds() > ttl_secs,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use fastnum::udec64;

    fn stats(volume: u64, win_rate: f64, pnl: i64, drawdown: u64, last_trade_ts: u64, trades: u64) -> TraderStatsSnapshot {
        TraderStatsSnapshot {
            last_trade_ts,
            trade_count_30d: trades,
            volume_usd_30d: fastnum::UD64::from(volume),
            realized_pnl_30d: fastnum::D256::from(pnl),
            win_rate_30d: win_rate,
            median_trade_usd_30d: udec64!(100),
            max_drawdown_30d: fastnum::UD64::from(drawdown),
        }
    }

    #[test]
    fn ranking_breaks_ties_by_volume_then_address() {
        let a = LeaderboardEntry {
            trader_address: address!("0x0000000000000000000000000000000000000a"),
            score: 50.0,
            volume_usd_30d: 1000.0,
        };
        let b = LeaderboardEntry {
            trader_address: address!("0x0000000000000000000000000000000000000b"),
            score: 50.0,
            volume_usd_30d: 2000.0,
        };
        let ranked = rank(vec![a, b]);
        assert_eq!(ranked[0].volume_usd_30d, 2000.0);
    }

    #[test]
    fn eligibility_requires_all_three_thresholds() {
        let now = Utc::now();
        let thresholds = EligibilityThresholds::default();
        let eligible = TraderInputs {
            trader_address: address!("0x0000000000000000000000000000000000000c"),
            stats: stats(20_000_000, 0.6, 5_000, 100, now.timestamp() as u64, 400),
            stddev_daily_pnl: 1000.0,
            leverage_variance: 0.1,
        };
        assert!(is_eligible(&eligible, &thresholds, now));

        let mut too_few_trades = eligible.clone();
        too_few_trades.stats.trade_count_30d = 10;
        assert!(!is_eligible(&too_few_trades, &thresholds, now));
    }

    #[test]
    fn score_is_deterministic_given_same_inputs() {
        let inputs = vec![TraderInputs {
            trader_address: address!("0x0000000000000000000000000000000000000d"),
            stats: stats(5_000_000, 0.5, 1000, 50, 0, 350),
            stddev_daily_pnl: 200.0,
            leverage_variance: 0.2,
        }];
        let weights = ScoreWeights::default();
        let a = score_all(&inputs, &weights);
        let b = score_all(&inputs, &weights);
        assert!((a[0].score - b[0].score).abs() < 1e-9);
    }
}
