//! Boot-time configuration (C12).
//!
//! Mirrors the margin-top-up bot's two-source split: environment variables
//! carry connection details and secrets, loaded once into an immutable
//! struct via [`envy`]; CLI flags carry operational tuning, each also
//! readable from its own environment variable so a deployment can set
//! everything through the environment if it prefers. Every field is parsed
//! exactly once at boot; nothing downstream re-reads the process
//! environment. The one piece of configuration that changes after boot,
//! `ExecModeState`, deliberately lives in the shared store instead.

use alloy::primitives::Address;
use clap::Parser;
use fastnum::UD64;

use crate::error::ConfigError;
use crate::exec::RateLimits;
use crate::indexer::IndexerTunables;
use crate::leaderboard::EligibilityThresholds;
use crate::risk::RiskLimits;
use crate::types::ExecMode;

/// Connection details and secrets, loaded from the environment.
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    pub chain_id: u64,
    pub exchange_address: String,
    pub deployed_at_block: u64,

    pub base_rpc_url: String,
    pub base_ws_url: String,

    pub database_url: String,
    pub redis_url: String,

    pub private_key: String,

    #[serde(default = "default_health_port")]
    pub health_port: u16,

    #[serde(default = "default_rust_log")]
    pub rust_log: String,
}

fn default_health_port() -> u16 {
    8080
}

fn default_rust_log() -> String {
    "info".to_string()
}

impl EnvConfig {
    /// Loads configuration from environment variables (via `.env` file or
    /// shell). A required field missing or malformed is fatal.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::from_env()?)
    }

    pub fn exchange_address(&self) -> Result<Address, ConfigError> {
        self.exchange_address
            .parse()
            .map_err(|e: alloy::primitives::hex::FromHexError| ConfigError::InvalidValue {
                field: "exchange_address",
                reason: e.to_string(),
            })
    }

    pub fn base_rpc_url(&self) -> Result<url::Url, ConfigError> {
        self.base_rpc_url.parse().map_err(|e: url::ParseError| ConfigError::InvalidValue {
            field: "base_rpc_url",
            reason: e.to_string(),
        })
    }

    pub fn base_ws_url(&self) -> Result<url::Url, ConfigError> {
        self.base_ws_url.parse().map_err(|e: url::ParseError| ConfigError::InvalidValue {
            field: "base_ws_url",
            reason: e.to_string(),
        })
    }
}

/// Operational tuning, each flag also readable from its own environment
/// variable (§6's recognized environment options).
#[derive(Debug, Parser)]
#[command(name = "copytrader")]
#[command(about = "Copy-trading pipeline for the Avantis perpetuals exchange")]
pub struct CliConfig {
    #[arg(long, env = "INDEXER_BACKFILL_RANGE", default_value_t = 50_000)]
    pub indexer_backfill_range: u64,

    #[arg(long, env = "INDEXER_PAGE", default_value_t = 2_000)]
    pub indexer_page: u64,

    #[arg(long, env = "INDEXER_SLEEP_WS", default_value_t = 2)]
    pub indexer_sleep_ws: u64,

    #[arg(long, env = "INDEXER_SLEEP_HTTP", default_value_t = 5)]
    pub indexer_sleep_http: u64,

    #[arg(long, env = "INDEXER_FINALITY_DEPTH", default_value_t = 12)]
    pub indexer_finality_depth: u64,

    #[arg(long, env = "INDEXER_ALARM_THRESHOLD", default_value_t = 50)]
    pub indexer_alarm_threshold: u64,

    #[arg(long, env = "LEADER_ACTIVE_HOURS", default_value_t = 72)]
    pub leader_active_hours: i64,

    #[arg(long, env = "LEADER_MIN_TRADES_30D", default_value_t = 300)]
    pub leader_min_trades_30d: u64,

    #[arg(long, env = "LEADER_MIN_VOLUME_30D_USD", default_value_t = 10_000_000.0)]
    pub leader_min_volume_30d_usd: f64,

    #[arg(long, env = "LEADERBOARD_CACHE_TTL", default_value_t = 60)]
    pub leaderboard_cache_ttl: u64,

    #[arg(long, env = "COPY_EXECUTION_MODE", default_value = "DRY")]
    pub copy_execution_mode: String,

    #[arg(long, env = "EMERGENCY_STOP", default_value_t = false)]
    pub emergency_stop: bool,

    #[arg(long, env = "MAX_POSITION_SIZE_USD", default_value = "100000")]
    pub max_position_size_usd: String,

    #[arg(long, env = "MAX_ACCOUNT_RISK_PCT", default_value_t = 0.10)]
    pub max_account_risk_pct: f64,

    #[arg(long, env = "MAX_LEVERAGE", default_value_t = 500)]
    pub max_leverage: u32,

    #[arg(long, env = "LIQUIDATION_BUFFER_PCT", default_value_t = 0.05)]
    pub liquidation_buffer_pct: f64,

    #[arg(long, env = "MAX_DAILY_LOSS_PCT", default_value_t = 0.20)]
    pub max_daily_loss_pct: f64,

    #[arg(long, env = "HOURLY_NOTIONAL_CAP_USD", default_value = "10000")]
    pub hourly_notional_cap_usd: String,

    #[arg(long, env = "PRICE_MAX_AGE_SECS", default_value_t = 5)]
    pub price_max_age_secs: i64,

    #[arg(long, env = "PRICE_DISAGREEMENT_BPS", default_value_t = 50)]
    pub price_disagreement_bps: u32,

    #[arg(long, env = "RL_OPENS_PER_MINUTE", default_value_t = 5)]
    pub rl_opens_per_minute: u64,

    #[arg(long, env = "RL_TRADES_PER_DAY", default_value_t = 50)]
    pub rl_trades_per_day: u64,

    #[arg(long, env = "RL_CHAT_MESSAGES_PER_MINUTE", default_value_t = 30)]
    pub rl_chat_messages_per_minute: u64,

    #[arg(long, env = "EXEC_WORKER_POOL_SIZE", default_value_t = 16)]
    pub exec_worker_pool_size: usize,

    #[arg(long, env = "DRAIN_TIMEOUT_S", default_value_t = 30)]
    pub drain_timeout_s: u64,

    #[arg(long, env = "FANOUT_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub fanout_poll_interval_ms: u64,

    #[arg(long, env = "PNL_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub pnl_poll_interval_ms: u64,

    #[arg(long, env = "LEADERBOARD_REFRESH_INTERVAL_S", default_value_t = 60)]
    pub leaderboard_refresh_interval_s: u64,
}

impl CliConfig {
    pub fn to_indexer_tunables(&self) -> IndexerTunables {
        IndexerTunables {
            backfill_range: self.indexer_backfill_range,
            finality_depth: self.indexer_finality_depth,
            sleep_ws: std::time::Duration::from_secs(self.indexer_sleep_ws),
            sleep_http: std::time::Duration::from_secs(self.indexer_sleep_http),
            alarm_threshold: self.indexer_alarm_threshold,
        }
    }

    pub fn to_eligibility_thresholds(&self) -> EligibilityThresholds {
        EligibilityThresholds {
            active_hours: self.leader_active_hours,
            min_trades_30d: self.leader_min_trades_30d,
            min_volume_30d_usd: self.leader_min_volume_30d_usd,
        }
    }

    pub fn leaderboard_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.leaderboard_cache_ttl)
    }

    pub fn to_risk_limits(&self) -> Result<RiskLimits, ConfigError> {
        let max_position_size_usd = parse_ud64(&self.max_position_size_usd, "max_position_size_usd")?;
        Ok(RiskLimits {
            max_position_size_usd,
            max_account_risk_pct: self.max_account_risk_pct,
            max_leverage_bps: self.max_leverage.saturating_mul(10_000),
            liquidation_buffer_pct: self.liquidation_buffer_pct,
            max_daily_loss_pct: self.max_daily_loss_pct,
            price_max_age_secs: self.price_max_age_secs,
            price_disagreement_bps: self.price_disagreement_bps,
        })
    }

    pub fn to_rate_limits(&self) -> Result<RateLimits, ConfigError> {
        let hourly_notional_cap_usd = parse_ud64(&self.hourly_notional_cap_usd, "hourly_notional_cap_usd")?;
        Ok(RateLimits {
            opens_per_minute: self.rl_opens_per_minute,
            trades_per_day: self.rl_trades_per_day,
            hourly_notional_cap_usd,
            chat_messages_per_minute: self.rl_chat_messages_per_minute,
        })
    }

    pub fn drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.drain_timeout_s)
    }

    pub fn fanout_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fanout_poll_interval_ms)
    }

    pub fn pnl_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pnl_poll_interval_ms)
    }

    pub fn leaderboard_refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.leaderboard_refresh_interval_s)
    }

    pub fn to_exec_mode(&self) -> Result<ExecMode, ConfigError> {
        match self.copy_execution_mode.to_ascii_uppercase().as_str() {
            "DRY" => Ok(ExecMode::Dry),
            "LIVE" => Ok(ExecMode::Live),
            other => Err(ConfigError::InvalidValue {
                field: "copy_execution_mode",
                reason: format!("expected DRY or LIVE, got {other}"),
            }),
        }
    }
}

fn parse_ud64(raw: &str, field: &'static str) -> Result<UD64, ConfigError> {
    UD64::from_str(raw, fastnum::decimal::Context::default()).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliConfig {
        CliConfig::parse_from(["copytrader"])
    }

    #[test]
    fn defaults_match_recognized_environment_options() {
        let c = cli();
        assert_eq!(c.indexer_backfill_range, 50_000);
        assert_eq!(c.indexer_page, 2_000);
        assert_eq!(c.leader_min_volume_30d_usd, 10_000_000.0);
        assert_eq!(c.max_leverage, 500);
        assert_eq!(c.copy_execution_mode, "DRY");
        assert!(!c.emergency_stop);
    }

    #[test]
    fn default_exec_mode_is_dry() {
        assert!(matches!(cli().to_exec_mode().unwrap(), ExecMode::Dry));
    }

    #[test]
    fn unrecognized_exec_mode_is_rejected() {
        let mut c = cli();
        c.copy_execution_mode = "YOLO".to_string();
        assert!(matches!(c.to_exec_mode(), Err(ConfigError::InvalidValue { field: "copy_execution_mode", .. })));
    }

    #[test]
    fn risk_limits_convert_leverage_to_bps() {
        let c = cli();
        let limits = c.to_risk_limits().unwrap();
        assert_eq!(limits.max_leverage_bps, 500 * 10_000);
    }

    #[test]
    fn malformed_position_size_is_invalid_value() {
        let mut c = cli();
        c.max_position_size_usd = "not-a-number".to_string();
        assert!(matches!(c.to_risk_limits(), Err(ConfigError::InvalidValue { field: "max_position_size_usd", .. })));
    }
}
