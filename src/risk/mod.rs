//! Per-intent risk validation (C9). Pure decision logic over already-fetched
//! inputs — price quotes, equity, daily PnL — so it is testable without the
//! price/portfolio collaborators running.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use fastnum::UD64;

use crate::price::{PriceQuote, disagree_beyond};
use crate::types::ReasonCode;

#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    #[error("equity unavailable for {0}")]
    Unavailable(Address),
}

/// External portfolio/equity collaborator (§4.6, §9: stubbed in the source;
/// a null reading must not be treated as zero equity).
pub trait PortfolioProvider: Send + Sync {
    fn get_equity(&self, trader: Address) -> impl Future<Output = Result<Option<UD64>, PortfolioError>> + Send;

    /// Realized + unrealized PnL since the start of the trader's current
    /// trading day, for the daily loss cap check.
    fn get_daily_pnl(&self, trader: Address) -> impl Future<Output = Result<fastnum::D256, PortfolioError>> + Send;
}

/// Boot-time risk thresholds (§4.7, §6 environment options).
#[derive(Clone, Copy, Debug)]
pub struct RiskLimits {
    pub max_position_size_usd: UD64,
    pub max_account_risk_pct: f64,
    pub max_leverage_bps: u32,
    pub liquidation_buffer_pct: f64,
    pub max_daily_loss_pct: f64,
    pub price_max_age_secs: i64,
    pub price_disagreement_bps: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size_usd: fastnum::udec64!(100000),
            max_account_risk_pct: 0.10,
            max_leverage_bps: 500 * 10_000,
            liquidation_buffer_pct: 0.05,
            max_daily_loss_pct: 0.20,
            price_max_age_secs: 5,
            price_disagreement_bps: 50,
        }
    }
}

/// Everything the validator needs about one candidate intent, decoupled from
/// [`crate::types::CopyIntent`] so the fanout and tx layers can shape it
/// differently without this module depending on them.
#[derive(Clone, Debug)]
pub struct RiskInput {
    pub trader: Address,
    pub collateral_usd: UD64,
    pub leverage_bps: u32,
    pub equity: Option<UD64>,
    pub daily_pnl: fastnum::D256,
    pub start_of_day_equity: UD64,
    pub primary_price: Option<PriceQuote>,
    pub secondary_price: Option<PriceQuote>,
    pub mark_price: UD64,
    pub liquidation_price: UD64,
}

fn to_f64(v: UD64) -> f64 {
    v.to_string().parse().unwrap_or(0.0)
}

/// Runs every check in §4.7's order, short-circuiting on the first failure
/// (the order determines which reason code is reported when several hold).
pub fn validate(input: &RiskInput, limits: &RiskLimits, now: DateTime<Utc>) -> Result<(), ReasonCode> {
    let Some(equity) = input.equity else {
        return Err(ReasonCode::NoEquity);
    };

    if input.collateral_usd > limits.max_position_size_usd {
        return Err(ReasonCode::RiskPositionSize);
    }

    let max_by_equity = equity * fastnum::UD64::from((limits.max_account_risk_pct * 1_000_000.0) as u64)
        / fastnum::udec64!(1000000);
    if input.collateral_usd > max_by_equity {
        return Err(ReasonCode::RiskAccountPct);
    }

    if input.leverage_bps > limits.max_leverage_bps {
        return Err(ReasonCode::RiskLeverage);
    }

    match (input.primary_price, input.secondary_price) {
        (Some(p), _) if !p.is_fresh(now, limits.price_max_age_secs) => return Err(ReasonCode::StalePrice),
        (_, Some(s)) if !s.is_fresh(now, limits.price_max_age_secs) => return Err(ReasonCode::StalePrice),
        (None, _) | (_, None) => return Err(ReasonCode::StalePrice),
        (Some(p), Some(s)) if disagree_beyond(&p, &s, limits.price_disagreement_bps) => {
            return Err(ReasonCode::PriceOutlier);
        }
        _ => {}
    }

    if !input.mark_price.is_zero() {
        let distance = if input.liquidation_price > input.mark_price {
            input.liquidation_price - input.mark_price
        } else {
            input.mark_price - input.liquidation_price
        };
        let distance_pct = to_f64(distance / input.mark_price);
        if distance_pct < limits.liquidation_buffer_pct {
            return Err(ReasonCode::LiqBuffer);
        }
    }

    if !input.start_of_day_equity.is_zero() {
        let loss_limit = to_f64(input.start_of_day_equity) * limits.max_daily_loss_pct;
        let loss: f64 = input.daily_pnl.to_string().parse().unwrap_or(0.0);
        if -loss > loss_limit {
            return Err(ReasonCode::DailyLossCap);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use fastnum::{dec256, udec64};

    fn base_input() -> RiskInput {
        let now = Utc::now();
        RiskInput {
            trader: address!("0x0000000000000000000000000000000000000e"),
            collateral_usd: udec64!(1000),
            leverage_bps: 100_000,
            equity: Some(udec64!(10000)),
            daily_pnl: dec256!(0),
            start_of_day_equity: udec64!(10000),
            primary_price: Some(PriceQuote { price: udec64!(2000), observed_at: now, source_id: 1 }),
            secondary_price: Some(PriceQuote { price: udec64!(2001), observed_at: now, source_id: 2 }),
            mark_price: udec64!(2000),
            liquidation_price: udec64!(1800),
        }
    }

    #[test]
    fn accepts_within_all_limits() {
        let input = base_input();
        assert!(validate(&input, &RiskLimits::default(), Utc::now()).is_ok());
    }

    #[test]
    fn rejects_null_equity_as_no_equity() {
        let mut input = base_input();
        input.equity = None;
        assert_eq!(validate(&input, &RiskLimits::default(), Utc::now()), Err(ReasonCode::NoEquity));
    }

    #[test]
    fn rejects_collateral_over_account_risk_pct() {
        let mut input = base_input();
        input.collateral_usd = udec64!(2000);
        assert_eq!(validate(&input, &RiskLimits::default(), Utc::now()), Err(ReasonCode::RiskAccountPct));
    }

    #[test]
    fn rejects_stale_price() {
        let mut input = base_input();
        input.primary_price = Some(PriceQuote {
            price: udec64!(2000),
            observed_at: Utc::now() - chrono::Duration::seconds(30),
            source_id: 1,
        });
        assert_eq!(validate(&input, &RiskLimits::default(), Utc::now()), Err(ReasonCode::StalePrice));
    }

    #[test]
    fn rejects_liquidation_buffer_breach() {
        let mut input = base_input();
        input.liquidation_price = udec64!(1990);
        assert_eq!(validate(&input, &RiskLimits::default(), Utc::now()), Err(ReasonCode::LiqBuffer));
    }

    #[test]
    fn rejects_daily_loss_cap_breach() {
        let mut input = base_input();
        input.daily_pnl = dec256!(-3000);
        assert_eq!(validate(&input, &RiskLimits::default(), Utc::now()), Err(ReasonCode::DailyLossCap));
    }
}
