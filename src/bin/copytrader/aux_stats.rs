//! Auxiliary per-trader sample windows feeding the leaderboard's
//! `stddev_daily_pnl` and `leverage_variance` inputs, which `PnlEngine`
//! doesn't carry itself — it tracks realized PnL and win rate but not the
//! dispersion of per-trade outcomes or leverage choice. Pruned the same way
//! `pnl::TraderStats` prunes its own 30-day window, over two independent
//! per-trade sample streams instead of `pnl`'s notional-weighted one.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use alloy::primitives::Address;

const WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Default)]
struct TraderWindow {
    pnl_samples: VecDeque<(u64, f64)>,
    leverage_samples: VecDeque<(u64, f64)>,
}

impl TraderWindow {
    fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(WINDOW_SECS);
        while matches!(self.pnl_samples.front(), Some((ts, _)) if *ts < cutoff) {
            self.pnl_samples.pop_front();
        }
        while matches!(self.leverage_samples.front(), Some((ts, _)) if *ts < cutoff) {
            self.leverage_samples.pop_front();
        }
    }
}

fn population_variance(samples: &VecDeque<(u64, f64)>) -> f64 {
    let n = samples.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean = samples.iter().map(|(_, v)| v).sum::<f64>() / n;
    samples.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n
}

/// One closing fill's realized PnL and one opening fill's leverage are
/// independent sample streams per trader, kept within the same rolling
/// window `pnl::PnlEngine` uses for its own stats.
#[derive(Default)]
pub struct AuxStats {
    windows: Mutex<HashMap<Address, TraderWindow>>,
}

impl AuxStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_daily_pnl(&self, trader: Address, ts: u64, realized_pnl: f64) {
        let mut guard = self.windows.lock().expect("aux stats lock poisoned");
        let window = guard.entry(trader).or_default();
        window.pnl_samples.push_back((ts, realized_pnl));
        window.prune(ts);
    }

    pub fn record_leverage(&self, trader: Address, ts: u64, leverage_bps: u32) {
        let mut guard = self.windows.lock().expect("aux stats lock poisoned");
        let window = guard.entry(trader).or_default();
        window.leverage_samples.push_back((ts, leverage_bps as f64 / 10_000.0));
        window.prune(ts);
    }

    pub fn prune_all(&self, now: u64) {
        let mut guard = self.windows.lock().expect("aux stats lock poisoned");
        for window in guard.values_mut() {
            window.prune(now);
        }
    }

    /// Sample standard deviation of per-trade realized PnL, the denominator
    /// of the leaderboard's Sharpe-like term.
    pub fn stddev_daily_pnl(&self, trader: Address) -> f64 {
        let guard = self.windows.lock().expect("aux stats lock poisoned");
        guard.get(&trader).map(|w| population_variance(&w.pnl_samples).sqrt()).unwrap_or(0.0)
    }

    /// Population variance of the leverage ratio chosen per opened trade.
    pub fn leverage_variance(&self, trader: Address) -> f64 {
        let guard = self.windows.lock().expect("aux stats lock poisoned");
        guard.get(&trader).map(|w| population_variance(&w.leverage_samples)).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn trader() -> Address {
        address!("0x0000000000000000000000000000000000000a")
    }

    #[test]
    fn stddev_is_zero_with_fewer_than_two_samples() {
        let aux = AuxStats::new();
        aux.record_daily_pnl(trader(), 1, 100.0);
        assert_eq!(aux.stddev_daily_pnl(trader()), 0.0);
    }

    #[test]
    fn stddev_reflects_sample_dispersion() {
        let aux = AuxStats::new();
        aux.record_daily_pnl(trader(), 1, 100.0);
        aux.record_daily_pnl(trader(), 2, -100.0);
        assert!(aux.stddev_daily_pnl(trader()) > 0.0);
    }

    #[test]
    fn samples_outside_window_are_pruned() {
        let aux = AuxStats::new();
        aux.record_leverage(trader(), 1, 50_000);
        aux.prune_all(1 + WINDOW_SECS + 1);
        assert_eq!(aux.leverage_variance(trader()), 0.0);
    }
}
