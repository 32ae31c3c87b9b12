//! Long-lived collaborators the background tasks share. Bundled into one
//! struct, `Arc`'d once in `main`, the way the margin top-up bot bundles its
//! provider/instance/config fields onto a single struct instead of threading
//! each one through every function signature.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use alloy::primitives::{Address, U256};

use avantis_copytrader::chain::ChainClient;
use avantis_copytrader::exec::ExecGate;
use avantis_copytrader::health::HealthState;
use avantis_copytrader::leaderboard::{EligibilityThresholds, LeaderboardCache, ScoreWeights};
use avantis_copytrader::pnl::PnlEngine;
use avantis_copytrader::portfolio::{DailyPnlFeed, OnChainPortfolioProvider};
use avantis_copytrader::price::ChainPriceProvider;
use avantis_copytrader::risk::RiskLimits;
use avantis_copytrader::signer::LocalSigner;
use avantis_copytrader::store::pg::PgStore;
use avantis_copytrader::store::shared::RedisSharedStore;
use avantis_copytrader::tx::TxOrchestrator;
use avantis_copytrader::types::{PairId, UserId};

use crate::aux_stats::AuxStats;

pub struct AppState {
    pub store: PgStore,
    pub chain: std::sync::Arc<ChainClient>,
    pub shared: RedisSharedStore,
    pub health: Arc<HealthState<RedisSharedStore>>,

    pub engine: StdMutex<PnlEngine>,
    pub aux: AuxStats,
    pub daily_pnl: DailyPnlFeed,
    /// Traders the indexer has ever produced a fill for — the leaderboard
    /// task's candidate pool, since `PnlEngine` doesn't expose its own key set.
    pub traders_seen: StdMutex<HashSet<Address>>,

    pub leaderboard: LeaderboardCache,
    pub eligibility: EligibilityThresholds,
    pub score_weights: ScoreWeights,

    pub risk_limits: RiskLimits,
    pub gate: ExecGate<RedisSharedStore>,
    pub portfolio: OnChainPortfolioProvider,
    pub price: ChainPriceProvider,

    pub tx: TxOrchestrator<LocalSigner, RedisSharedStore>,
    pub signer_address: Address,
    pub collateral_decimals: u8,

    /// The service wallet's currently open on-chain trade id per
    /// `(user_id, pair_id)`, learned from the `TradeOpened` log of a
    /// confirmed open and consumed by the matching close — the exchange
    /// addresses positions by trade id, not by follower, so this is the
    /// worker's own bookkeeping rather than anything the contract tracks
    /// per copy-trading user.
    pub open_trade_ids: StdMutex<HashMap<(UserId, PairId), U256>>,
}
