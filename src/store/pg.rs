//! Relational repositories, one per aggregate (§4.11). Each repo owns its SQL
//! and transaction boundaries; nothing outside this module issues SQL
//! against these tables.

use std::{collections::HashSet, str::FromStr};

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use fastnum::{UD64, decimal::Context};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use ulid::Ulid;

use crate::types::{
    CopyIntent, Fill, FillId, FillSide, FollowConfig, PairId, ReasonCode, SizingMode,
    TxIntent, TxStatus, UserId,
};

fn ud64_to_decimal(v: UD64) -> Decimal {
    Decimal::from_str(&v.to_string()).unwrap_or_default()
}

fn decimal_to_ud64(v: Decimal) -> UD64 {
    UD64::from_str(&v.to_string(), Context::default()).unwrap_or_default()
}

fn side_to_str(side: FillSide) -> &'static str {
    match side {
        FillSide::Open => "OPEN",
        FillSide::Close => "CLOSE",
        FillSide::Liquidation => "LIQUIDATION",
    }
}

fn side_from_str(s: &str) -> FillSide {
    match s {
        "CLOSE" => FillSide::Close,
        "LIQUIDATION" => FillSide::Liquidation,
        _ => FillSide::Open,
    }
}

fn reason_to_str(r: ReasonCode) -> &'static str {
    r.as_str()
}

fn reason_from_str(s: &str) -> Option<ReasonCode> {
    Some(match s {
        "DRY_RUN" => ReasonCode::DryRun,
        "EMERGENCY_STOP" => ReasonCode::EmergencyStop,
        "NO_EQUITY" => ReasonCode::NoEquity,
        "RISK_POSITION_SIZE" => ReasonCode::RiskPositionSize,
        "RISK_ACCOUNT_PCT" => ReasonCode::RiskAccountPct,
        "RISK_LEVERAGE" => ReasonCode::RiskLeverage,
        "LIQ_BUFFER" => ReasonCode::LiqBuffer,
        "DAILY_LOSS_CAP" => ReasonCode::DailyLossCap,
        "STALE_PRICE" => ReasonCode::StalePrice,
        "PRICE_OUTLIER" => ReasonCode::PriceOutlier,
        "RATE_LIMITED" => ReasonCode::RateLimited,
        "PAIR_BLOCKED" => ReasonCode::PairBlocked,
        "OVERLOAD" => ReasonCode::Overload,
        "STUCK" => ReasonCode::Stuck,
        "NONCE_REUSED" => ReasonCode::NonceReused,
        "REVERTED" => ReasonCode::Reverted,
        "POSITION_NOT_FOUND" => ReasonCode::PositionNotFound,
        _ => return None,
    })
}

/// Top-level handle; individual repos borrow the same pool cheaply (`PgPool`
/// clones are reference-counted).
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn fills(&self) -> FillsRepo {
        FillsRepo { pool: self.pool.clone() }
    }

    pub fn cursor(&self) -> CursorRepo {
        CursorRepo { pool: self.pool.clone() }
    }

    pub fn quarantine(&self) -> QuarantineRepo {
        QuarantineRepo { pool: self.pool.clone() }
    }

    pub fn lots(&self) -> LotsRepo {
        LotsRepo { pool: self.pool.clone() }
    }

    pub fn stats(&self) -> StatsRepo {
        StatsRepo { pool: self.pool.clone() }
    }

    pub fn follows(&self) -> FollowRepo {
        FollowRepo { pool: self.pool.clone() }
    }

    pub fn copy_intents(&self) -> CopyIntentsRepo {
        CopyIntentsRepo { pool: self.pool.clone() }
    }

    pub fn tx_intents(&self) -> TxIntentsRepo {
        TxIntentsRepo { pool: self.pool.clone() }
    }

    /// Cheap reachability probe for the readiness endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Atomically upserts a batch of fills, deletes anything above a reorg
    /// point, and advances the cursor — all three happen inside one
    /// transaction so a crash mid-batch leaves the cursor untouched (§4.2
    /// "Persistence atomicity").
    pub async fn commit_indexer_batch(
        &self,
        chain_id: u64,
        fills: &[Fill],
        reorg_point: Option<u64>,
        cursor: Cursor,
    ) -> Result<(), sqlx::Error> {
        let mut txn = self.pool.begin().await?;

        if let Some(point) = reorg_point {
            sqlx::query("DELETE FROM fills WHERE block_number > $1")
                .bind(point as i64)
                .execute(&mut *txn)
                .await?;
        }

        for fill in fills {
            sqlx::query(
                r#"
                INSERT INTO fills (
                    chain_tx_hash, log_index, block_number, block_timestamp,
                    trader_address, pair_id, is_long, side,
                    size_usd, price, fee_usd, leverage_bps
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
                ON CONFLICT (chain_tx_hash, log_index) DO UPDATE SET
                    block_number = EXCLUDED.block_number,
                    block_timestamp = EXCLUDED.block_timestamp
                "#,
            )
            .bind(fill.chain_tx_hash.to_string())
            .bind(fill.log_index as i64)
            .bind(fill.block_number as i64)
            .bind(fill.block_timestamp as i64)
            .bind(fill.trader_address.to_string())
            .bind(fill.pair_id as i32)
            .bind(fill.is_long)
            .bind(side_to_str(fill.side))
            .bind(ud64_to_decimal(fill.size_usd))
            .bind(ud64_to_decimal(fill.price))
            .bind(ud64_to_decimal(fill.fee_usd))
            .bind(fill.leverage_bps as i64)
            .execute(&mut *txn)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (chain_id, last_safe_block, last_seen_block, schema_version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id) DO UPDATE SET
                last_safe_block = EXCLUDED.last_safe_block,
                last_seen_block = EXCLUDED.last_seen_block,
                schema_version = EXCLUDED.schema_version
            "#,
        )
        .bind(chain_id as i64)
        .bind(cursor.last_safe_block as i64)
        .bind(cursor.last_seen_block as i64)
        .bind(cursor.schema_version)
        .execute(&mut *txn)
        .await?;

        txn.commit().await
    }
}

/// `fills` (§3 `Fill`, invariant 1: natural key uniqueness).
#[derive(Clone)]
pub struct FillsRepo {
    pool: PgPool,
}

impl FillsRepo {
    /// Upsert on the natural key `(chain_tx_hash, log_index)`; replaying a
    /// range that hasn't reorged is a no-op (§4.2).
    pub async fn upsert(&self, fill: &Fill) -> Result<FillId, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO fills (
                chain_tx_hash, log_index, block_number, block_timestamp,
                trader_address, pair_id, is_long, side,
                size_usd, price, fee_usd, leverage_bps
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (chain_tx_hash, log_index) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                block_timestamp = EXCLUDED.block_timestamp
            RETURNING id
            "#,
        )
        .bind(fill.chain_tx_hash.to_string())
        .bind(fill.log_index as i64)
        .bind(fill.block_number as i64)
        .bind(fill.block_timestamp as i64)
        .bind(fill.trader_address.to_string())
        .bind(fill.pair_id as i32)
        .bind(fill.is_long)
        .bind(side_to_str(fill.side))
        .bind(ud64_to_decimal(fill.size_usd))
        .bind(ud64_to_decimal(fill.price))
        .bind(ud64_to_decimal(fill.fee_usd))
        .bind(fill.leverage_bps as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    /// Deletes fills above `reorg_point`, the sole path by which fills may be
    /// deleted (§4.2).
    pub async fn delete_above(&self, reorg_point: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM fills WHERE block_number > $1")
            .bind(reorg_point as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_from(&self, from_block: u64) -> Result<Vec<Fill>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, chain_tx_hash, log_index, block_number, block_timestamp,
                   trader_address, pair_id, is_long, side, size_usd, price, fee_usd, leverage_bps
            FROM fills WHERE block_number >= $1 ORDER BY block_number, log_index
            "#,
        )
        .bind(from_block as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_fill).collect())
    }

    pub async fn by_trader(&self, trader: Address, pair_id: PairId) -> Result<Vec<Fill>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, chain_tx_hash, log_index, block_number, block_timestamp,
                   trader_address, pair_id, is_long, side, size_usd, price, fee_usd, leverage_bps
            FROM fills WHERE trader_address = $1 AND pair_id = $2
            ORDER BY block_number, log_index
            "#,
        )
        .bind(trader.to_string())
        .bind(pair_id as i32)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_fill).collect())
    }
}

fn row_to_fill(row: sqlx::postgres::PgRow) -> Fill {
    Fill {
        id: Some(row.get::<i64, _>("id")),
        chain_tx_hash: TxHash::from_str(row.get::<String, _>("chain_tx_hash").as_str())
            .unwrap_or_default(),
        log_index: row.get::<i64, _>("log_index") as u32,
        block_number: row.get::<i64, _>("block_number") as u64,
        block_timestamp: row.get::<i64, _>("block_timestamp") as u64,
        trader_address: Address::from_str(row.get::<String, _>("trader_address").as_str())
            .unwrap_or_default(),
        pair_id: row.get::<i32, _>("pair_id") as PairId,
        is_long: row.get::<bool, _>("is_long"),
        side: side_from_str(row.get::<String, _>("side").as_str()),
        size_usd: decimal_to_ud64(row.get::<Decimal, _>("size_usd")),
        price: decimal_to_ud64(row.get::<Decimal, _>("price")),
        fee_usd: decimal_to_ud64(row.get::<Decimal, _>("fee_usd")),
        leverage_bps: row.get::<i64, _>("leverage_bps") as u32,
    }
}

/// `indexer_cursor`: single row per (chain, contract) (§3 `IndexerCursor`).
#[derive(Clone)]
pub struct CursorRepo {
    pool: PgPool,
}

#[derive(Clone, Copy, Debug)]
pub struct Cursor {
    pub last_safe_block: u64,
    pub last_seen_block: u64,
    pub schema_version: i32,
}

impl CursorRepo {
    pub async fn load(&self, chain_id: u64) -> Result<Option<Cursor>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT last_safe_block, last_seen_block, schema_version FROM indexer_cursor WHERE chain_id = $1",
        )
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Cursor {
            last_safe_block: r.get::<i64, _>("last_safe_block") as u64,
            last_seen_block: r.get::<i64, _>("last_seen_block") as u64,
            schema_version: r.get::<i32, _>("schema_version"),
        }))
    }

    /// Read-modify-write atomically with each batch commit (§3).
    pub async fn save(&self, chain_id: u64, cursor: Cursor) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (chain_id, last_safe_block, last_seen_block, schema_version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id) DO UPDATE SET
                last_safe_block = EXCLUDED.last_safe_block,
                last_seen_block = EXCLUDED.last_seen_block,
                schema_version = EXCLUDED.schema_version
            "#,
        )
        .bind(chain_id as i64)
        .bind(cursor.last_safe_block as i64)
        .bind(cursor.last_seen_block as i64)
        .bind(cursor.schema_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// `quarantined_logs` (§3 `QuarantinedLog`).
#[derive(Clone)]
pub struct QuarantineRepo {
    pool: PgPool,
}

#[derive(Clone, Debug)]
pub struct QuarantinedLog {
    pub chain_tx_hash: TxHash,
    pub log_index: u32,
    pub block_number: u64,
    pub raw_topics: Vec<String>,
    pub raw_data: String,
    pub error: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl QuarantineRepo {
    pub async fn insert(&self, log: &QuarantinedLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO quarantined_logs
                (chain_tx_hash, log_index, block_number, raw_topics, raw_data, error, acknowledged, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (chain_tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(log.chain_tx_hash.to_string())
        .bind(log.log_index as i64)
        .bind(log.block_number as i64)
        .bind(&log.raw_topics)
        .bind(&log.raw_data)
        .bind(&log.error)
        .bind(log.acknowledged)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The cursor must not advance past an unacknowledged quarantine entry
    /// within the range being committed (§3, §4.2).
    pub async fn has_unacknowledged_below(&self, block_number: u64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM quarantined_logs WHERE block_number <= $1 AND NOT acknowledged) AS present",
        )
        .bind(block_number as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>("present"))
    }

    /// The lowest block number carrying an unacknowledged entry, if any —
    /// the bound the indexer's cursor must not advance past.
    pub async fn oldest_unacknowledged_block(&self) -> Result<Option<u64>, sqlx::Error> {
        let row = sqlx::query("SELECT MIN(block_number) AS oldest FROM quarantined_logs WHERE NOT acknowledged")
            .fetch_one(&self.pool)
            .await?;
        let oldest: Option<i64> = row.get("oldest");
        Ok(oldest.map(|v| v as u64))
    }

    pub async fn acknowledge(&self, chain_tx_hash: TxHash, log_index: u32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE quarantined_logs SET acknowledged = true WHERE chain_tx_hash = $1 AND log_index = $2")
            .bind(chain_tx_hash.to_string())
            .bind(log_index as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// `position_lots`, entirely derived state (§3 `PositionLot`).
#[derive(Clone)]
pub struct LotsRepo {
    pool: PgPool,
}

#[derive(Clone, Debug)]
pub struct LotRow {
    pub id: Option<i64>,
    pub trader_address: Address,
    pub pair_id: PairId,
    pub is_long: bool,
    pub remaining_size_usd: UD64,
    pub entry_price: UD64,
    pub entry_ts: u64,
    pub source_fill_id: FillId,
}

impl LotsRepo {
    pub async fn open_lots(&self, trader: Address, pair_id: PairId, is_long: bool) -> Result<Vec<LotRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, trader_address, pair_id, is_long, remaining_size_usd, entry_price, entry_ts, source_fill_id
            FROM position_lots
            WHERE trader_address = $1 AND pair_id = $2 AND is_long = $3
            ORDER BY entry_ts, source_fill_id
            "#,
        )
        .bind(trader.to_string())
        .bind(pair_id as i32)
        .bind(is_long)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LotRow {
                id: Some(r.get::<i64, _>("id")),
                trader_address: Address::from_str(r.get::<String, _>("trader_address").as_str())
                    .unwrap_or_default(),
                pair_id: r.get::<i32, _>("pair_id") as PairId,
                is_long: r.get::<bool, _>("is_long"),
                remaining_size_usd: decimal_to_ud64(r.get::<Decimal, _>("remaining_size_usd")),
                entry_price: decimal_to_ud64(r.get::<Decimal, _>("entry_price")),
                entry_ts: r.get::<i64, _>("entry_ts") as u64,
                source_fill_id: r.get::<i64, _>("source_fill_id"),
            })
            .collect())
    }

    pub async fn push(&self, lot: &LotRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO position_lots
                (trader_address, pair_id, is_long, remaining_size_usd, entry_price, entry_ts, source_fill_id)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(lot.trader_address.to_string())
        .bind(lot.pair_id as i32)
        .bind(lot.is_long)
        .bind(ud64_to_decimal(lot.remaining_size_usd))
        .bind(ud64_to_decimal(lot.entry_price))
        .bind(lot.entry_ts as i64)
        .bind(lot.source_fill_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_remaining(&self, id: i64, remaining: UD64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE position_lots SET remaining_size_usd = $1 WHERE id = $2")
            .bind(ud64_to_decimal(remaining))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Closed lots are deleted (§3).
    pub async fn delete(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM position_lots WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Truncate everything: used to rebuild stats from an empty state (§8
    /// property 4).
    pub async fn truncate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("TRUNCATE position_lots").execute(&self.pool).await?;
        Ok(())
    }
}

/// `trader_stats` (§3 `TraderStats30d`).
#[derive(Clone)]
pub struct StatsRepo {
    pool: PgPool,
}

#[derive(Clone, Debug)]
pub struct TraderStatsRow {
    pub trader_address: Address,
    pub last_trade_ts: u64,
    pub trade_count_30d: u64,
    pub volume_usd_30d: UD64,
    pub median_trade_usd_30d: UD64,
    pub realized_pnl_30d: fastnum::D256,
    pub win_rate_30d: f64,
    pub max_drawdown_30d: UD64,
    pub last_updated: DateTime<Utc>,
}

impl StatsRepo {
    pub async fn upsert(&self, stats: &TraderStatsRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trader_stats (
                trader_address, last_trade_ts, trade_count_30d, volume_usd_30d,
                median_trade_usd_30d, realized_pnl_30d, win_rate_30d, max_drawdown_30d, last_updated
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (trader_address) DO UPDATE SET
                last_trade_ts = EXCLUDED.last_trade_ts,
                trade_count_30d = EXCLUDED.trade_count_30d,
                volume_usd_30d = EXCLUDED.volume_usd_30d,
                median_trade_usd_30d = EXCLUDED.median_trade_usd_30d,
                realized_pnl_30d = EXCLUDED.realized_pnl_30d,
                win_rate_30d = EXCLUDED.win_rate_30d,
                max_drawdown_30d = EXCLUDED.max_drawdown_30d,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(stats.trader_address.to_string())
        .bind(stats.last_trade_ts as i64)
        .bind(stats.trade_count_30d as i64)
        .bind(ud64_to_decimal(stats.volume_usd_30d))
        .bind(ud64_to_decimal(stats.median_trade_usd_30d))
        .bind(Decimal::from_str(&stats.realized_pnl_30d.to_string()).unwrap_or_default())
        .bind(stats.win_rate_30d)
        .bind(ud64_to_decimal(stats.max_drawdown_30d))
        .bind(stats.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn eligible_for_leaderboard(
        &self,
        active_since: DateTime<Utc>,
        min_trades: u64,
        min_volume: UD64,
    ) -> Result<Vec<TraderStatsRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT trader_address, last_trade_ts, trade_count_30d, volume_usd_30d,
                   median_trade_usd_30d, realized_pnl_30d, win_rate_30d, max_drawdown_30d, last_updated
            FROM trader_stats
            WHERE last_updated >= $1 AND trade_count_30d >= $2 AND volume_usd_30d >= $3
            "#,
        )
        .bind(active_since)
        .bind(min_trades as i64)
        .bind(ud64_to_decimal(min_volume))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| TraderStatsRow {
                trader_address: Address::from_str(r.get::<String, _>("trader_address").as_str())
                    .unwrap_or_default(),
                last_trade_ts: r.get::<i64, _>("last_trade_ts") as u64,
                trade_count_30d: r.get::<i64, _>("trade_count_30d") as u64,
                volume_usd_30d: decimal_to_ud64(r.get::<Decimal, _>("volume_usd_30d")),
                median_trade_usd_30d: decimal_to_ud64(r.get::<Decimal, _>("median_trade_usd_30d")),
                realized_pnl_30d: fastnum::D256::from_str(
                    &r.get::<Decimal, _>("realized_pnl_30d").to_string(),
                    Context::default(),
                )
                .unwrap_or_default(),
                win_rate_30d: r.get::<f64, _>("win_rate_30d"),
                max_drawdown_30d: decimal_to_ud64(r.get::<Decimal, _>("max_drawdown_30d")),
                last_updated: r.get::<DateTime<Utc>, _>("last_updated"),
            })
            .collect())
    }
}

/// `follow_configs`, PK `(user_id, trader_key)` with a secondary index on
/// `trader_key` (§4.5, §6).
#[derive(Clone)]
pub struct FollowRepo {
    pool: PgPool,
}

fn sizing_mode_to_str(mode: SizingMode) -> &'static str {
    match mode {
        SizingMode::FixedNotional => "FIXED_NOTIONAL",
        SizingMode::PctEquity => "PCT_EQUITY",
        SizingMode::Mirror => "MIRROR",
    }
}

fn sizing_mode_from_str(s: &str) -> SizingMode {
    match s {
        "PCT_EQUITY" => SizingMode::PctEquity,
        "MIRROR" => SizingMode::Mirror,
        _ => SizingMode::FixedNotional,
    }
}

fn pair_set_to_vec(set: &HashSet<PairId>) -> Vec<i32> {
    set.iter().map(|p| *p as i32).collect()
}

fn pair_set_from_vec(v: Vec<i32>) -> HashSet<PairId> {
    v.into_iter().map(|p| p as PairId).collect()
}

impl FollowRepo {
    pub async fn upsert(&self, cfg: &FollowConfig) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO follow_configs (
                user_id, trader_key, sizing_mode, sizing_value, max_leverage_bps,
                max_slippage_bps, per_trade_cap_usd, daily_cap_usd, pair_allow_set,
                pair_block_set, notify, auto_copy, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            ON CONFLICT (user_id, trader_key) DO UPDATE SET
                sizing_mode = EXCLUDED.sizing_mode,
                sizing_value = EXCLUDED.sizing_value,
                max_leverage_bps = EXCLUDED.max_leverage_bps,
                max_slippage_bps = EXCLUDED.max_slippage_bps,
                per_trade_cap_usd = EXCLUDED.per_trade_cap_usd,
                daily_cap_usd = EXCLUDED.daily_cap_usd,
                pair_allow_set = EXCLUDED.pair_allow_set,
                pair_block_set = EXCLUDED.pair_block_set,
                notify = EXCLUDED.notify,
                auto_copy = EXCLUDED.auto_copy,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cfg.user_id as i64)
        .bind(cfg.trader_key.to_string())
        .bind(sizing_mode_to_str(cfg.sizing_mode))
        .bind(ud64_to_decimal(cfg.sizing_value))
        .bind(cfg.max_leverage_bps as i64)
        .bind(cfg.max_slippage_bps as i32)
        .bind(ud64_to_decimal(cfg.per_trade_cap_usd))
        .bind(ud64_to_decimal(cfg.daily_cap_usd))
        .bind(pair_set_to_vec(&cfg.pair_allow_set))
        .bind(pair_set_to_vec(&cfg.pair_block_set))
        .bind(cfg.notify)
        .bind(cfg.auto_copy)
        .bind(cfg.created_at)
        .bind(cfg.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: UserId, trader_key: Address) -> Result<Option<FollowConfig>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT user_id, trader_key, sizing_mode, sizing_value, max_leverage_bps,
                   max_slippage_bps, per_trade_cap_usd, daily_cap_usd, pair_allow_set,
                   pair_block_set, notify, auto_copy, created_at, updated_at
            FROM follow_configs WHERE user_id = $1 AND trader_key = $2
            "#,
        )
        .bind(user_id as i64)
        .bind(trader_key.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_follow_config))
    }

    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<FollowConfig>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, trader_key, sizing_mode, sizing_value, max_leverage_bps,
                   max_slippage_bps, per_trade_cap_usd, daily_cap_usd, pair_allow_set,
                   pair_block_set, notify, auto_copy, created_at, updated_at
            FROM follow_configs WHERE user_id = $1
            "#,
        )
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_follow_config).collect())
    }

    /// O(log n + k) via the `trader_key` secondary index; the fanout hot path
    /// (§4.5, §4.6).
    pub async fn users_by_trader(&self, trader_key: Address) -> Result<Vec<UserId>, sqlx::Error> {
        let rows = sqlx::query("SELECT user_id FROM follow_configs WHERE trader_key = $1")
            .bind(trader_key.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<i64, _>("user_id") as UserId).collect())
    }

    pub async fn delete(&self, user_id: UserId, trader_key: Address) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM follow_configs WHERE user_id = $1 AND trader_key = $2")
            .bind(user_id as i64)
            .bind(trader_key.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_follow_config(row: sqlx::postgres::PgRow) -> FollowConfig {
    FollowConfig {
        user_id: row.get::<i64, _>("user_id") as UserId,
        trader_key: Address::from_str(row.get::<String, _>("trader_key").as_str()).unwrap_or_default(),
        sizing_mode: sizing_mode_from_str(row.get::<String, _>("sizing_mode").as_str()),
        sizing_value: decimal_to_ud64(row.get::<Decimal, _>("sizing_value")),
        max_leverage_bps: row.get::<i64, _>("max_leverage_bps") as u32,
        max_slippage_bps: row.get::<i32, _>("max_slippage_bps") as u16,
        per_trade_cap_usd: decimal_to_ud64(row.get::<Decimal, _>("per_trade_cap_usd")),
        daily_cap_usd: decimal_to_ud64(row.get::<Decimal, _>("daily_cap_usd")),
        pair_allow_set: pair_set_from_vec(row.get::<Vec<i32>, _>("pair_allow_set")),
        pair_block_set: pair_set_from_vec(row.get::<Vec<i32>, _>("pair_block_set")),
        notify: row.get::<bool, _>("notify"),
        auto_copy: row.get::<bool, _>("auto_copy"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

/// `copy_intents` (§3 `CopyIntent`).
#[derive(Clone)]
pub struct CopyIntentsRepo {
    pool: PgPool,
}

fn intent_status_to_str(s: crate::types::IntentStatus) -> &'static str {
    s.as_str()
}

fn intent_status_from_str(s: &str) -> crate::types::IntentStatus {
    use crate::types::IntentStatus::*;
    match s {
        "VALIDATED" => Validated,
        "SUBMITTED" => Submitted,
        "CONFIRMED" => Confirmed,
        "FAILED" => Failed,
        "SKIPPED" => Skipped,
        _ => Pending,
    }
}

impl CopyIntentsRepo {
    /// Insert a new intent; the `(user_id, source_fill_id)` unique constraint
    /// is fanout's idempotency backstop (§4.6, §8 property 5).
    pub async fn try_insert(&self, intent: &CopyIntent) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO copy_intents (
                intent_id, user_id, source_fill_id, pair_id, is_long, side,
                collateral_usd, leverage_bps, slippage_bps, status, reason_code, created_at, tx_hash
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            ON CONFLICT (user_id, source_fill_id) DO NOTHING
            "#,
        )
        .bind(intent.intent_id.to_string())
        .bind(intent.user_id as i64)
        .bind(intent.source_fill_id)
        .bind(intent.pair_id as i32)
        .bind(intent.is_long)
        .bind(side_to_str(intent.side))
        .bind(ud64_to_decimal(intent.collateral_usd))
        .bind(intent.leverage_bps as i64)
        .bind(intent.slippage_bps as i64)
        .bind(intent_status_to_str(intent.status))
        .bind(intent.reason_code.map(reason_to_str))
        .bind(intent.created_at)
        .bind(intent.tx_hash.map(|h| h.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_status(
        &self,
        intent_id: Ulid,
        status: crate::types::IntentStatus,
        reason: Option<ReasonCode>,
        tx_hash: Option<TxHash>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE copy_intents SET status = $1, reason_code = $2, tx_hash = COALESCE($3, tx_hash) WHERE intent_id = $4",
        )
        .bind(intent_status_to_str(status))
        .bind(reason.map(reason_to_str))
        .bind(tx_hash.map(|h| h.to_string()))
        .bind(intent_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, intent_id: Ulid) -> Result<Option<CopyIntent>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT intent_id, user_id, source_fill_id, pair_id, is_long, side,
                   collateral_usd, leverage_bps, slippage_bps, status, reason_code, created_at, tx_hash
            FROM copy_intents WHERE intent_id = $1
            "#,
        )
        .bind(intent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_copy_intent))
    }
}

fn row_to_copy_intent(row: sqlx::postgres::PgRow) -> CopyIntent {
    CopyIntent {
        intent_id: Ulid::from_str(row.get::<String, _>("intent_id").as_str()).unwrap_or_default(),
        user_id: row.get::<i64, _>("user_id") as UserId,
        source_fill_id: row.get::<i64, _>("source_fill_id"),
        pair_id: row.get::<i32, _>("pair_id") as PairId,
        is_long: row.get::<bool, _>("is_long"),
        side: side_from_str(row.get::<String, _>("side").as_str()),
        collateral_usd: decimal_to_ud64(row.get::<Decimal, _>("collateral_usd")),
        leverage_bps: row.get::<i64, _>("leverage_bps") as u32,
        slippage_bps: row.get::<i64, _>("slippage_bps") as u32,
        status: intent_status_from_str(row.get::<String, _>("status").as_str()),
        reason_code: row
            .get::<Option<String>, _>("reason_code")
            .and_then(|s| reason_from_str(&s)),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        tx_hash: row
            .get::<Option<String>, _>("tx_hash")
            .and_then(|s| TxHash::from_str(&s).ok()),
    }
}

/// `tx_intents` (§3 `TxIntent`, §4.8's state machine).
#[derive(Clone)]
pub struct TxIntentsRepo {
    pool: PgPool,
}

fn tx_status_to_str(s: TxStatus) -> &'static str {
    match s {
        TxStatus::Built => "BUILT",
        TxStatus::Signed => "SIGNED",
        TxStatus::Broadcast => "BROADCAST",
        TxStatus::MinedOk => "MINED_OK",
        TxStatus::MinedFail => "MINED_FAIL",
        TxStatus::Dropped => "DROPPED",
    }
}

fn tx_status_from_str(s: &str) -> TxStatus {
    match s {
        "SIGNED" => TxStatus::Signed,
        "BROADCAST" => TxStatus::Broadcast,
        "MINED_OK" => TxStatus::MinedOk,
        "MINED_FAIL" => TxStatus::MinedFail,
        "DROPPED" => TxStatus::Dropped,
        _ => TxStatus::Built,
    }
}

impl TxIntentsRepo {
    /// Every state change is durable before the next action (§4.8). Inserts
    /// a new row the first time (`tx.id == None`), updates it in place on
    /// every subsequent call (fee bumps, receipt updates).
    pub async fn upsert(&self, tx: &TxIntent) -> Result<i64, sqlx::Error> {
        if let Some(id) = tx.id {
            sqlx::query(
                r#"
                UPDATE tx_intents SET
                    attempts = $1, status = $2, max_fee_per_gas = $3,
                    max_priority_fee_per_gas = $4, tx_hash = $5,
                    receipt_block = $6, receipt_gas_used = $7
                WHERE id = $8
                "#,
            )
            .bind(tx.attempts as i32)
            .bind(tx_status_to_str(tx.status))
            .bind(tx.max_fee_per_gas.to_string())
            .bind(tx.max_priority_fee_per_gas.to_string())
            .bind(tx.tx_hash.map(|h| h.to_string()))
            .bind(tx.receipt_block.map(|b| b as i64))
            .bind(tx.receipt_gas_used.map(|g| g as i64))
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(id)
        } else {
            let row = sqlx::query(
                r#"
                INSERT INTO tx_intents (
                    intent_id, nonce, to_address, data, value, gas_limit,
                    max_fee_per_gas, max_priority_fee_per_gas, attempts, status,
                    tx_hash, receipt_block, receipt_gas_used
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
                RETURNING id
                "#,
            )
            .bind(tx.intent_id.to_string())
            .bind(tx.nonce as i64)
            .bind(tx.to.to_string())
            .bind(tx.data.to_string())
            .bind(tx.value.to_string())
            .bind(tx.gas_limit as i64)
            .bind(tx.max_fee_per_gas.to_string())
            .bind(tx.max_priority_fee_per_gas.to_string())
            .bind(tx.attempts as i32)
            .bind(tx_status_to_str(tx.status))
            .bind(tx.tx_hash.map(|h| h.to_string()))
            .bind(tx.receipt_block.map(|b| b as i64))
            .bind(tx.receipt_gas_used.map(|g| g as i64))
            .fetch_one(&self.pool)
            .await?;
            Ok(row.get::<i64, _>("id"))
        }
    }

    /// In-flight `BROADCAST` rows, resumed on process start without
    /// resubmitting (§4.8, §5).
    pub async fn in_flight(&self) -> Result<Vec<TxIntent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, intent_id, nonce, to_address, data, value, gas_limit,
                   max_fee_per_gas, max_priority_fee_per_gas, attempts, status,
                   tx_hash, receipt_block, receipt_gas_used
            FROM tx_intents WHERE status = 'BROADCAST'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_tx_intent).collect())
    }

    pub async fn by_intent(&self, intent_id: Ulid) -> Result<Vec<TxIntent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, intent_id, nonce, to_address, data, value, gas_limit,
                   max_fee_per_gas, max_priority_fee_per_gas, attempts, status,
                   tx_hash, receipt_block, receipt_gas_used
            FROM tx_intents WHERE intent_id = $1 ORDER BY id
            "#,
        )
        .bind(intent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_tx_intent).collect())
    }
}

fn row_to_tx_intent(row: sqlx::postgres::PgRow) -> TxIntent {
    TxIntent {
        id: Some(row.get::<i64, _>("id")),
        intent_id: Ulid::from_str(row.get::<String, _>("intent_id").as_str()).unwrap_or_default(),
        nonce: row.get::<i64, _>("nonce") as u64,
        to: Address::from_str(row.get::<String, _>("to_address").as_str()).unwrap_or_default(),
        data: alloy::primitives::Bytes::from_str(row.get::<String, _>("data").as_str()).unwrap_or_default(),
        value: alloy::primitives::U256::from_str(row.get::<String, _>("value").as_str()).unwrap_or_default(),
        gas_limit: row.get::<i64, _>("gas_limit") as u64,
        max_fee_per_gas: row.get::<String, _>("max_fee_per_gas").parse().unwrap_or_default(),
        max_priority_fee_per_gas: row
            .get::<String, _>("max_priority_fee_per_gas")
            .parse()
            .unwrap_or_default(),
        attempts: row.get::<i32, _>("attempts") as u8,
        status: tx_status_from_str(row.get::<String, _>("status").as_str()),
        tx_hash: row.get::<Option<String>, _>("tx_hash").and_then(|s| TxHash::from_str(&s).ok()),
        receipt_block: row.get::<Option<i64>, _>("receipt_block").map(|b| b as u64),
        receipt_gas_used: row.get::<Option<i64>, _>("receipt_gas_used").map(|g| g as u64),
    }
}
