//! The canonical, normalized trade event: a [`Fill`].

use alloy::primitives::{Address, TxHash};
use fastnum::UD64;

use super::PairId;

/// Side of a fill: did it open, voluntarily close, or get force-closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillSide {
    Open,
    Close,
    Liquidation,
}

impl FillSide {
    /// Liquidations and voluntary closes both consume the opposing FIFO queue.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Close | Self::Liquidation)
    }
}

/// Monotonically increasing identifier assigned by the store on insert;
/// doubles as `source_fill_id` elsewhere in the pipeline.
pub type FillId = i64;

/// One normalized trade-side event, decoded from a `TradeOpened` /
/// `TradeClosed` / `Liquidated` log.
///
/// `(chain_tx_hash, log_index)` is the natural key (§3); `id` is the
/// store-assigned surrogate used by foreign keys elsewhere (lots, intents).
#[derive(Clone, Debug, PartialEq)]
pub struct Fill {
    pub id: Option<FillId>,
    pub chain_tx_hash: TxHash,
    pub log_index: u32,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub trader_address: Address,
    pub pair_id: PairId,
    pub is_long: bool,
    pub side: FillSide,
    pub size_usd: UD64,
    pub price: UD64,
    pub fee_usd: UD64,
    pub leverage_bps: u32,
}

impl Fill {
    /// Natural key used for upsert/dedup (§3, invariant 1).
    pub fn natural_key(&self) -> (TxHash, u32) {
        (self.chain_tx_hash, self.log_index)
    }

    pub fn direction(&self) -> super::Direction {
        super::Direction::from_is_long(self.is_long)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{TxHash, address};
    use fastnum::udec64;

    use super::*;

    fn fill(log_index: u32) -> Fill {
        Fill {
            id: None,
            chain_tx_hash: TxHash::ZERO,
            log_index,
            block_number: 100,
            block_timestamp: 1_700_000_000,
            trader_address: address!("0x00000000000000000000000000000000000001"),
            pair_id: 1,
            is_long: true,
            side: FillSide::Open,
            size_usd: udec64!(1000),
            price: udec64!(2500),
            fee_usd: udec64!(1),
            leverage_bps: 50_000,
        }
    }

    #[test]
    fn natural_key_distinguishes_log_index() {
        let a = fill(0);
        let b = fill(1);
        assert_ne!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn closing_sides() {
        assert!(!FillSide::Open.is_closing());
        assert!(FillSide::Close.is_closing());
        assert!(FillSide::Liquidation.is_closing());
    }
}
