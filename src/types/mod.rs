//! Shared value types for the copy-trading pipeline.

mod fill;
mod follow;
mod intent;

pub use fill::*;
pub use follow::*;
pub use intent::*;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

/// On-chain pair identifier, e.g. the `ETH/USD` perpetual.
pub type PairId = u16;

/// Chat-side user identifier. Opaque to the core; the chat collaborator owns
/// its meaning (Telegram id, Discord id, ...).
pub type UserId = u64;

/// A trader is identified by their on-chain account address.
pub type TraderKey = Address;

/// Process-wide execution mode, persisted as a singleton in the shared store
/// (§3 `ExecModeState`). Mutated only through C8's admin operations; read by
/// fanout (C7) and the tx orchestrator (C10).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Dry,
    Live,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecModeState {
    pub mode: ExecMode,
    pub emergency_stop: bool,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

impl Default for ExecModeState {
    fn default() -> Self {
        Self {
            mode: ExecMode::Dry,
            emergency_stop: false,
            updated_by: 0,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Direction of a position, derived from a fill's `is_long` flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn from_is_long(is_long: bool) -> Self {
        if is_long { Self::Long } else { Self::Short }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Self::Long)
    }

    /// `+1` for long lots, `-1` for short lots (§4.3).
    pub fn sign(&self) -> i32 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}
