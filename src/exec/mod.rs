//! Execution gate (C8): the global DRY/LIVE switch, emergency stop, and the
//! token-bucket rate limiters that sit in front of the risk validator and tx
//! orchestrator. Every check here runs before an intent may become
//! `SUBMITTED` (§4.7).

use std::time::Duration;

use fastnum::UD64;

use crate::health::Metrics;
use crate::store::SharedStore;
use crate::types::{ExecMode, ExecModeState, ReasonCode, UserId};

/// Boot-time rate-limit configuration (§4.7, §6).
#[derive(Clone, Copy, Debug)]
pub struct RateLimits {
    pub opens_per_minute: u64,
    pub trades_per_day: u64,
    pub hourly_notional_cap_usd: UD64,
    pub chat_messages_per_minute: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            opens_per_minute: 5,
            trades_per_day: 50,
            hourly_notional_cap_usd: fastnum::udec64!(10000),
            chat_messages_per_minute: 30,
        }
    }
}

pub struct ExecGate<S> {
    store: S,
    limits: RateLimits,
    metrics: Metrics,
}

impl<S: SharedStore> ExecGate<S> {
    pub fn new(store: S, limits: RateLimits, metrics: Metrics) -> Self {
        Self { store, limits, metrics }
    }

    pub async fn current_mode(&self) -> Result<ExecModeState, redis::RedisError> {
        self.store.get_exec_mode().await
    }

    pub async fn set_mode(&self, mode: ExecMode, admin_id: UserId) -> Result<(), redis::RedisError> {
        let mut state = self.store.get_exec_mode().await?;
        state.mode = mode;
        state.updated_by = admin_id;
        state.updated_at = chrono::Utc::now();
        self.store.set_exec_mode(state).await
    }

    pub async fn set_emergency_stop(&self, on: bool, admin_id: UserId) -> Result<(), redis::RedisError> {
        let mut state = self.store.get_exec_mode().await?;
        state.emergency_stop = on;
        state.updated_by = admin_id;
        state.updated_at = chrono::Utc::now();
        self.store.set_exec_mode(state).await
    }

    /// First gate an intent must pass: the DRY/LIVE mode check (§4.7). Does
    /// not touch rate limits — call [`ExecGate::check_rate_limits`]
    /// separately once the mode check has cleared.
    pub async fn check_mode(&self) -> Result<(), GateOutcome> {
        let state = self
            .store
            .get_exec_mode()
            .await
            .map_err(|e| GateOutcome::Error(e.to_string()))?;
        if state.emergency_stop {
            return Err(GateOutcome::Rejected(ReasonCode::EmergencyStop));
        }
        if matches!(state.mode, ExecMode::Dry) {
            return Err(GateOutcome::Rejected(ReasonCode::DryRun));
        }
        Ok(())
    }

    /// Opens/trades/notional rate limiting (§4.7). `is_open` distinguishes
    /// the tighter opens-per-minute bucket from the daily trade-count bucket,
    /// which applies to both opens and closes.
    pub async fn check_rate_limits(
        &self,
        user_id: UserId,
        is_open: bool,
        notional_usd: UD64,
    ) -> Result<(), GateOutcome> {
        let map_err = |e: redis::RedisError| GateOutcome::Error(e.to_string());

        if is_open {
            let key = format!("{user_id}:opens");
            if !self
                .store
                .allow(&key, self.limits.opens_per_minute, Duration::from_secs(60))
                .await
                .map_err(map_err)?
            {
                self.metrics.rate_limiter_rejections_total.inc();
                return Err(GateOutcome::Rejected(ReasonCode::RateLimited));
            }
        }

        let trades_key = format!("{user_id}:trades");
        if !self
            .store
            .allow(&trades_key, self.limits.trades_per_day, Duration::from_secs(86_400))
            .await
            .map_err(map_err)?
        {
            self.metrics.rate_limiter_rejections_total.inc();
            return Err(GateOutcome::Rejected(ReasonCode::RateLimited));
        }

        let notional_key = format!("{user_id}:notional_hourly");
        let whole_dollars = whole_usd(notional_usd);
        let cap_dollars = whole_usd(self.limits.hourly_notional_cap_usd);
        let total = self
            .store
            .add_usage(&notional_key, whole_dollars, Duration::from_secs(3600))
            .await
            .map_err(map_err)?;
        if total > cap_dollars {
            self.metrics.rate_limiter_rejections_total.inc();
            return Err(GateOutcome::Rejected(ReasonCode::RateLimited));
        }

        Ok(())
    }

    pub async fn check_chat_rate_limit(&self, user_id: UserId) -> Result<bool, redis::RedisError> {
        let key = format!("{user_id}:chat");
        self.store
            .allow(&key, self.limits.chat_messages_per_minute, Duration::from_secs(60))
            .await
    }
}

#[derive(Debug)]
pub enum GateOutcome {
    Rejected(ReasonCode),
    Error(String),
}

/// The usage accumulator only deals in integer dollars; the decimal part of
/// a notional amount is rounded up so small fractional trades still consume
/// at least one unit of the bucket.
fn whole_usd(v: UD64) -> u64 {
    let s = v.to_string();
    let int_part = s.split('.').next().unwrap_or("0");
    let mut dollars: u64 = int_part.parse().unwrap_or(u64::MAX);
    if s.contains('.') && !s.ends_with(".0") && !int_part.is_empty() {
        dollars = dollars.saturating_add(1);
    }
    dollars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySharedStore;
    use crate::types::ExecModeState;

    #[tokio::test]
    async fn dry_mode_rejects_with_dry_run() {
        let gate = ExecGate::new(InMemorySharedStore::default(), RateLimits::default(), Metrics::new().unwrap());
        let outcome = gate.check_mode().await;
        assert!(matches!(outcome, Err(GateOutcome::Rejected(ReasonCode::DryRun))));
    }

    #[tokio::test]
    async fn emergency_stop_takes_precedence_over_live() {
        let store = InMemorySharedStore::default();
        store
            .set_exec_mode(ExecModeState {
                mode: ExecMode::Live,
                emergency_stop: true,
                updated_by: 1,
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let gate = ExecGate::new(store, RateLimits::default(), Metrics::new().unwrap());
        let outcome = gate.check_mode().await;
        assert!(matches!(outcome, Err(GateOutcome::Rejected(ReasonCode::EmergencyStop))));
    }

    #[tokio::test]
    async fn live_mode_without_stop_passes() {
        let store = InMemorySharedStore::default();
        store
            .set_exec_mode(ExecModeState {
                mode: ExecMode::Live,
                emergency_stop: false,
                updated_by: 1,
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let gate = ExecGate::new(store, RateLimits::default(), Metrics::new().unwrap());
        assert!(gate.check_mode().await.is_ok());
    }

    #[tokio::test]
    async fn opens_rate_limit_rejects_past_burst() {
        let gate = ExecGate::new(InMemorySharedStore::default(), RateLimits::default(), Metrics::new().unwrap());
        for _ in 0..5 {
            assert!(gate.check_rate_limits(1, true, fastnum::udec64!(10)).await.is_ok());
        }
        let outcome = gate.check_rate_limits(1, true, fastnum::udec64!(10)).await;
        assert!(matches!(outcome, Err(GateOutcome::Rejected(ReasonCode::RateLimited))));
    }

    #[tokio::test]
    async fn hourly_notional_cap_rejects_cumulative_overage() {
        let gate = ExecGate::new(InMemorySharedStore::default(), RateLimits::default(), Metrics::new().unwrap());
        assert!(gate.check_rate_limits(2, false, fastnum::udec64!(6000)).await.is_ok());
        let outcome = gate.check_rate_limits(2, false, fastnum::udec64!(6000)).await;
        assert!(matches!(outcome, Err(GateOutcome::Rejected(ReasonCode::RateLimited))));
    }
}
