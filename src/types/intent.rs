//! Derived, in-flight execution records: [`CopyIntent`] and [`TxIntent`] (§3).

use alloy::primitives::{Address, Bytes, TxHash, U256};
use chrono::{DateTime, Utc};
use fastnum::UD64;
use ulid::Ulid;

use super::{FillId, FillSide, PairId, UserId};

/// Forward-only state machine, except `Submitted -> Failed` on receipt failure (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Validated,
    Submitted,
    Confirmed,
    Failed,
    Skipped,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Validated => "VALIDATED",
            IntentStatus::Submitted => "SUBMITTED",
            IntentStatus::Confirmed => "CONFIRMED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Skipped => "SKIPPED",
        }
    }
}

/// Why an intent was skipped or failed. Reported to the user, once, via the
/// chat collaborator event stream (§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    DryRun,
    EmergencyStop,
    NoEquity,
    RiskPositionSize,
    RiskAccountPct,
    RiskLeverage,
    LiqBuffer,
    DailyLossCap,
    StalePrice,
    PriceOutlier,
    RateLimited,
    PairBlocked,
    Overload,
    Stuck,
    NonceReused,
    Reverted,
    PositionNotFound,
}

impl ReasonCode {
    /// Stable wire identifier for the chat event stream (§6).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "DRY_RUN",
            Self::EmergencyStop => "EMERGENCY_STOP",
            Self::NoEquity => "NO_EQUITY",
            Self::RiskPositionSize => "RISK_POSITION_SIZE",
            Self::RiskAccountPct => "RISK_ACCOUNT_PCT",
            Self::RiskLeverage => "RISK_LEVERAGE",
            Self::LiqBuffer => "LIQ_BUFFER",
            Self::DailyLossCap => "DAILY_LOSS_CAP",
            Self::StalePrice => "STALE_PRICE",
            Self::PriceOutlier => "PRICE_OUTLIER",
            Self::RateLimited => "RATE_LIMITED",
            Self::PairBlocked => "PAIR_BLOCKED",
            Self::Overload => "OVERLOAD",
            Self::Stuck => "STUCK",
            Self::NonceReused => "NONCE_REUSED",
            Self::Reverted => "REVERTED",
            Self::PositionNotFound => "POSITION_NOT_FOUND",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The system's representation of an order it plans to, or did, submit.
#[derive(Clone, Debug)]
pub struct CopyIntent {
    pub intent_id: Ulid,
    pub user_id: UserId,
    pub source_fill_id: FillId,
    pub pair_id: PairId,
    pub is_long: bool,
    pub side: FillSide,
    pub collateral_usd: UD64,
    pub leverage_bps: u32,
    pub slippage_bps: u32,
    pub status: IntentStatus,
    pub reason_code: Option<ReasonCode>,
    pub created_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
}

impl CopyIntent {
    pub fn new(
        user_id: UserId,
        source_fill_id: FillId,
        pair_id: PairId,
        is_long: bool,
        side: FillSide,
        collateral_usd: UD64,
        leverage_bps: u32,
        slippage_bps: u32,
    ) -> Self {
        Self {
            intent_id: Ulid::new(),
            user_id,
            source_fill_id,
            pair_id,
            is_long,
            side,
            collateral_usd,
            leverage_bps,
            slippage_bps,
            status: IntentStatus::Pending,
            reason_code: None,
            created_at: Utc::now(),
            tx_hash: None,
        }
    }

    /// Idempotency key for fanout (§4.6): at most one intent per `(user_id, source_fill_id)`.
    pub fn idempotency_key(&self) -> (UserId, FillId) {
        (self.user_id, self.source_fill_id)
    }

    pub fn skip(&mut self, reason: ReasonCode) {
        self.status = IntentStatus::Skipped;
        self.reason_code = Some(reason);
    }

    pub fn fail(&mut self, reason: ReasonCode) {
        self.status = IntentStatus::Failed;
        self.reason_code = Some(reason);
    }
}

/// Low-level chain submission state, independent of the higher-level
/// `CopyIntent` it fulfills (one intent maps to at most one live `TxIntent`,
/// but a stuck-tx replacement reuses the nonce under a new row, §4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Built,
    Signed,
    Broadcast,
    MinedOk,
    MinedFail,
    Dropped,
}

#[derive(Clone, Debug)]
pub struct TxIntent {
    pub id: Option<i64>,
    pub intent_id: Ulid,
    pub nonce: u64,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub attempts: u8,
    pub status: TxStatus,
    pub tx_hash: Option<TxHash>,
    pub receipt_block: Option<u64>,
    pub receipt_gas_used: Option<u64>,
}

impl TxIntent {
    pub fn new(
        intent_id: Ulid,
        nonce: u64,
        to: Address,
        data: Bytes,
        value: U256,
        gas_limit: u64,
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    ) -> Self {
        Self {
            id: None,
            intent_id,
            nonce,
            to,
            data,
            value,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            attempts: 0,
            status: TxStatus::Built,
            tx_hash: None,
            receipt_block: None,
            receipt_gas_used: None,
        }
    }

    /// Bump both fee fields by at least `pct` (e.g. `12` for 12%) for a
    /// stuck-tx replacement, keeping the nonce fixed (§4.8).
    pub fn bump_fees(&mut self, pct: u128) {
        self.max_fee_per_gas += self.max_fee_per_gas * pct / 100;
        self.max_priority_fee_per_gas += self.max_priority_fee_per_gas * pct / 100;
        self.attempts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn bump_fees_increases_by_at_least_requested_percent() {
        let mut tx = TxIntent::new(
            Ulid::new(),
            1,
            address!("0x00000000000000000000000000000000000003"),
            Bytes::new(),
            U256::ZERO,
            21_000,
            1_000_000_000,
            100_000_000,
        );
        tx.bump_fees(12);
        assert!(tx.max_fee_per_gas >= 1_000_000_000 * 112 / 100);
        assert!(tx.max_priority_fee_per_gas >= 100_000_000 * 112 / 100);
        assert_eq!(tx.attempts, 1);
    }

    #[test]
    fn idempotency_key_is_user_and_fill() {
        let intent = CopyIntent::new(7, 42, 1, true, FillSide::Open, fastnum::udec64!(100), 50_000, 100);
        assert_eq!(intent.idempotency_key(), (7, 42));
    }
}
