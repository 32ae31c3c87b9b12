//! On-chain portfolio collaborator backing [`crate::risk::PortfolioProvider`].
//! Equity reads the venue's own accounting (`getTraderEquity`); the realized
//! component of the daily PnL figure comes from a same-process feed the PnL
//! engine task keeps current, since the contract interface has no "PnL since
//! midnight" view of its own (§9 open question).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use fastnum::{D256, UD64, dec256};

use crate::abi::dex::Exchange::ExchangeInstance;
use crate::chain::ChainClient;
use crate::num::Converter;
use crate::risk::{PortfolioError, PortfolioProvider};

/// Shared handle the PnL task writes today's realized PnL into, keyed by
/// trader, and this provider reads from. Cheap to clone; guarded by a plain
/// mutex since updates are infrequent relative to reads.
#[derive(Clone, Default)]
pub struct DailyPnlFeed {
    inner: Arc<Mutex<HashMap<Address, D256>>>,
}

impl DailyPnlFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, trader: Address, daily_pnl: D256) {
        self.inner.lock().expect("daily pnl feed lock poisoned").insert(trader, daily_pnl);
    }

    pub fn get(&self, trader: Address) -> D256 {
        self.inner.lock().expect("daily pnl feed lock poisoned").get(&trader).copied().unwrap_or(dec256!(0))
    }
}

pub struct OnChainPortfolioProvider {
    chain: Arc<ChainClient>,
    collateral_decimals: u8,
    daily_pnl: DailyPnlFeed,
}

impl OnChainPortfolioProvider {
    pub fn new(chain: Arc<ChainClient>, collateral_decimals: u8, daily_pnl: DailyPnlFeed) -> Self {
        Self { chain, collateral_decimals, daily_pnl }
    }
}

impl PortfolioProvider for OnChainPortfolioProvider {
    async fn get_equity(&self, trader: Address) -> Result<Option<UD64>, PortfolioError> {
        let instance = ExchangeInstance::new(self.chain.exchange(), self.chain.provider().clone());
        let raw = instance
            .getTraderEquity(trader)
            .call()
            .await
            .map_err(|_| PortfolioError::Unavailable(trader))?;
        Ok(Some(Converter::new(self.collateral_decimals).from_unsigned(raw)))
    }

    async fn get_daily_pnl(&self, trader: Address) -> Result<D256, PortfolioError> {
        Ok(self.daily_pnl.get(trader))
    }
}
