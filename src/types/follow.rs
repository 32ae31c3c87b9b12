//! Per-user follow configuration (§3 `FollowConfig`, §4.5).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use fastnum::UD64;

use super::{PairId, TraderKey, UserId};

/// How a follower's collateral is derived from the leader's fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizingMode {
    /// Always the same notional, capped at `per_trade_cap`.
    FixedNotional,
    /// A fixed percentage of the follower's own equity.
    PctEquity,
    /// Proportional to the leader's `size_usd / leader_equity`.
    Mirror,
}

/// Per-`(user_id, trader_key)` copy configuration. Composite primary key.
#[derive(Clone, Debug)]
pub struct FollowConfig {
    pub user_id: UserId,
    pub trader_key: TraderKey,
    pub sizing_mode: SizingMode,
    /// Meaning depends on `sizing_mode`: fixed USD notional, or a fraction
    /// in `[0, 1]` of equity for `PctEquity`/`Mirror`.
    pub sizing_value: UD64,
    pub max_leverage_bps: u32,
    pub max_slippage_bps: u16,
    pub per_trade_cap_usd: UD64,
    pub daily_cap_usd: UD64,
    pub pair_allow_set: HashSet<PairId>,
    pub pair_block_set: HashSet<PairId>,
    pub notify: bool,
    pub auto_copy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FollowConfig {
    /// A pair is copyable under this config if it isn't blocked, and (when an
    /// allow-list is configured) is present in it.
    pub fn allows_pair(&self, pair_id: PairId) -> bool {
        if self.pair_block_set.contains(&pair_id) {
            return false;
        }
        self.pair_allow_set.is_empty() || self.pair_allow_set.contains(&pair_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use fastnum::udec64;
    use std::collections::HashSet;

    fn base_cfg() -> FollowConfig {
        FollowConfig {
            user_id: 1,
            trader_key: address!("0x00000000000000000000000000000000000002"),
            sizing_mode: SizingMode::FixedNotional,
            sizing_value: udec64!(100),
            max_leverage_bps: 100_000,
            max_slippage_bps: 50,
            per_trade_cap_usd: udec64!(500),
            daily_cap_usd: udec64!(2000),
            pair_allow_set: HashSet::new(),
            pair_block_set: HashSet::new(),
            notify: true,
            auto_copy: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_allow_set_permits_any_pair_not_blocked() {
        let mut cfg = base_cfg();
        assert!(cfg.allows_pair(7));
        cfg.pair_block_set.insert(7);
        assert!(!cfg.allows_pair(7));
    }

    #[test]
    fn non_empty_allow_set_restricts_to_listed_pairs() {
        let mut cfg = base_cfg();
        cfg.pair_allow_set.insert(1);
        assert!(cfg.allows_pair(1));
        assert!(!cfg.allows_pair(2));
    }
}
