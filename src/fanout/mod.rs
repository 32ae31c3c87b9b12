//! Signal fanout (C7): turns one finalized fill from a followed trader into
//! a `CopyIntent` per follower, subject to sizing translation, per-pair
//! allow/block lists, leverage/slippage caps, idempotency, and the
//! emergency-stop kill-switch (§4.6).

use std::time::Duration;

use alloy::primitives::Address;
use fastnum::UD64;

use crate::types::{CopyIntent, FillId, FillSide, FollowConfig, PairId, ReasonCode, SizingMode, UserId};

/// Derived from a finalized fill whose trader is followed by at least one
/// user (§4.6 "Trigger").
#[derive(Clone, Copy, Debug)]
pub struct TraderSignal {
    pub trader_address: Address,
    pub pair_id: PairId,
    pub is_long: bool,
    pub side: FillSide,
    pub size_usd: UD64,
    pub leverage_bps: u32,
    pub source_fill_id: FillId,
    /// Leader's own equity, for `MIRROR` sizing; `None` if unavailable.
    pub leader_equity: Option<UD64>,
}

impl TraderSignal {
    /// Notification dedup identity (§4.6: suppressed within a 5-minute TTL).
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{:?}:{}", self.trader_address, self.pair_id, self.side, self.source_fill_id)
    }
}

pub const NOTIFICATION_DEDUP_TTL: Duration = Duration::from_secs(300);

/// Default on-chain slippage tolerance before a follower's own
/// `max_slippage_bps` cap is applied (§4.6 step 5, downward-only).
pub const DEFAULT_SLIPPAGE_BPS: u32 = 100;

/// What fanout decided to do for one `(signal, follower)` pair.
pub enum FanoutDecision {
    /// `auto_copy = false`: tell the user, build nothing.
    NotifyOnly,
    Build(CopyIntent),
    Skip(ReasonCode),
}

/// Sizing translation (§4.6 step 4). `equity` is the follower's own equity,
/// required for `PCT_EQUITY`; a `None` reading is a deliberate `NO_EQUITY`
/// skip rather than an assumed default (§9 open question).
fn translate_size(cfg: &FollowConfig, signal: &TraderSignal, equity: Option<UD64>) -> Result<UD64, ReasonCode> {
    let raw = match cfg.sizing_mode {
        SizingMode::FixedNotional => cfg.sizing_value.min(cfg.per_trade_cap_usd),
        SizingMode::PctEquity => {
            let equity = equity.ok_or(ReasonCode::NoEquity)?;
            (equity * cfg.sizing_value).min(cfg.per_trade_cap_usd)
        }
        SizingMode::Mirror => {
            let leader_equity = signal.leader_equity.ok_or(ReasonCode::NoEquity)?;
            if leader_equity.is_zero() {
                return Err(ReasonCode::NoEquity);
            }
            let ratio = signal.size_usd / leader_equity;
            let follower_equity = equity.ok_or(ReasonCode::NoEquity)?;
            (follower_equity * ratio).min(cfg.per_trade_cap_usd)
        }
    };
    Ok(raw)
}

/// Decides what to do for one follower of one signal, applying pair
/// allow/block lists and downward-only leverage/collateral caps (§4.6 steps
/// 3-5). Pure — no I/O, no idempotency check (the caller owns that via
/// `CopyIntentsRepo::try_insert`).
pub fn decide(signal: &TraderSignal, user_id: UserId, cfg: &FollowConfig, equity: Option<UD64>) -> FanoutDecision {
    if !cfg.allows_pair(signal.pair_id) {
        return FanoutDecision::Skip(ReasonCode::PairBlocked);
    }
    if !cfg.auto_copy {
        return FanoutDecision::NotifyOnly;
    }

    let collateral = match translate_size(cfg, signal, equity) {
        Ok(c) => c,
        Err(reason) => return FanoutDecision::Skip(reason),
    };
    if collateral.is_zero() {
        return FanoutDecision::Skip(ReasonCode::NoEquity);
    }

    let leverage_bps = signal.leverage_bps.min(cfg.max_leverage_bps);
    let slippage_bps = DEFAULT_SLIPPAGE_BPS.min(cfg.max_slippage_bps as u32);

    let mut intent = CopyIntent::new(
        user_id,
        signal.source_fill_id,
        signal.pair_id,
        signal.is_long,
        signal.side,
        collateral,
        leverage_bps,
        slippage_bps,
    );
    intent.status = crate::types::IntentStatus::Validated;
    FanoutDecision::Build(intent)
}

/// Records the kill-switch outcome: fanout still creates an auditable
/// `SKIPPED` intent, it just never reaches execution (§4.6 "Kill-switch").
pub fn emergency_stop_intent(signal: &TraderSignal, user_id: UserId) -> CopyIntent {
    let mut intent = CopyIntent::new(
        user_id,
        signal.source_fill_id,
        signal.pair_id,
        signal.is_long,
        signal.side,
        fastnum::udec64!(0),
        0,
        0,
    );
    intent.skip(ReasonCode::EmergencyStop);
    intent
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use fastnum::udec64;
    use std::collections::HashSet;

    fn cfg(mode: SizingMode, sizing_value: UD64) -> FollowConfig {
        FollowConfig {
            user_id: 1,
            trader_key: address!("0x0000000000000000000000000000000000000f"),
            sizing_mode: mode,
            sizing_value,
            max_leverage_bps: 200_000,
            max_slippage_bps: 50,
            per_trade_cap_usd: udec64!(1000),
            daily_cap_usd: udec64!(5000),
            pair_allow_set: HashSet::new(),
            pair_block_set: HashSet::new(),
            notify: true,
            auto_copy: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn signal() -> TraderSignal {
        TraderSignal {
            trader_address: address!("0x0000000000000000000000000000000000000f"),
            pair_id: 1,
            is_long: true,
            side: FillSide::Open,
            size_usd: udec64!(5000),
            leverage_bps: 100_000,
            source_fill_id: 42,
            leader_equity: Some(udec64!(10000)),
        }
    }

    #[test]
    fn fixed_notional_caps_at_per_trade_cap() {
        let c = cfg(SizingMode::FixedNotional, udec64!(5000));
        match decide(&signal(), 1, &c, Some(udec64!(1))) {
            FanoutDecision::Build(intent) => assert_eq!(intent.collateral_usd, udec64!(1000)),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn pct_equity_with_no_equity_reading_skips() {
        let c = cfg(SizingMode::PctEquity, udec64!(0.1));
        match decide(&signal(), 1, &c, None) {
            FanoutDecision::Skip(ReasonCode::NoEquity) => {}
            _ => panic!("expected NO_EQUITY skip"),
        }
    }

    #[test]
    fn auto_copy_false_is_notify_only() {
        let mut c = cfg(SizingMode::FixedNotional, udec64!(100));
        c.auto_copy = false;
        assert!(matches!(decide(&signal(), 1, &c, Some(udec64!(1000))), FanoutDecision::NotifyOnly));
    }

    #[test]
    fn blocked_pair_skips_before_sizing() {
        let mut c = cfg(SizingMode::FixedNotional, udec64!(100));
        c.pair_block_set.insert(1);
        assert!(matches!(decide(&signal(), 1, &c, Some(udec64!(1000))), FanoutDecision::Skip(ReasonCode::PairBlocked)));
    }

    #[test]
    fn leverage_cap_is_downward_only() {
        let c = cfg(SizingMode::FixedNotional, udec64!(100));
        match decide(&signal(), 1, &c, Some(udec64!(1000))) {
            FanoutDecision::Build(intent) => assert_eq!(intent.leverage_bps, 100_000),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn slippage_cap_is_downward_only() {
        let c = cfg(SizingMode::FixedNotional, udec64!(100));
        match decide(&signal(), 1, &c, Some(udec64!(1000))) {
            FanoutDecision::Build(intent) => assert_eq!(intent.slippage_bps, c.max_slippage_bps as u32),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn mirror_sizing_is_proportional_to_leader_ratio() {
        let c = cfg(SizingMode::Mirror, udec64!(0));
        match decide(&signal(), 1, &c, Some(udec64!(2000))) {
            FanoutDecision::Build(intent) => {
                // leader size 5000 / leader equity 10000 = 0.5; follower equity 2000 * 0.5 = 1000, capped.
                assert_eq!(intent.collateral_usd, udec64!(1000));
            }
            _ => panic!("expected build"),
        }
    }
}
