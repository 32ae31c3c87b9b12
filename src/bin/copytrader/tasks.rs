//! Background loops the binary spawns once collaborators are wired: PnL
//! ingestion, leaderboard refresh, signal fanout, and the execution worker
//! pool. Each follows the margin top-up bot's loop shape — `tokio::select!`
//! or a plain `loop { ... sleep ... }`, log and continue on a recoverable
//! error rather than propagating it out of the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use fastnum::{D256, dec256};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use avantis_copytrader::abi::dex::Exchange::ExchangeInstance;
use avantis_copytrader::chat::ChatBridge;
use avantis_copytrader::fanout::{self, FanoutDecision, TraderSignal};
use avantis_copytrader::leaderboard::{self, TraderInputs};
use avantis_copytrader::num::Converter;
use avantis_copytrader::risk::{self, PortfolioProvider, RiskInput};
use avantis_copytrader::store::pg::TraderStatsRow;
use avantis_copytrader::store::shared::RedisSharedStore;
use avantis_copytrader::tx::{self, Outcome};
use avantis_copytrader::types::{CopyIntent, FillSide, IntentStatus, ReasonCode};

use crate::state::AppState;

/// Fixed gas limit for both `openTrade` and `closeTrade`; the venue's own
/// gas estimation isn't exposed through the narrow ABI this crate models, so
/// a generous static ceiling stands in rather than calling `eth_estimateGas`
/// against an interface that might not support it for a not-yet-deployed
/// trade.
const EXEC_GAS_LIMIT: u64 = 600_000;

/// Replays committed fills into the PnL engine and the auxiliary sample
/// windows, then persists the refreshed rolling stats. Polls rather than
/// subscribes because the indexer's only durable output is the `fills`
/// table — there is no in-process fan-out from it to lean on instead.
pub async fn run_pnl_task(state: Arc<AppState>, poll_interval: Duration) {
    let mut last_block: u64 = 0;
    let mut daily: HashMap<Address, (chrono::NaiveDate, D256)> = HashMap::new();

    loop {
        let fills = match state.store.fills().list_from(last_block).await {
            Ok(fills) => fills,
            Err(e) => {
                error!(%e, "pnl task: failed to read fills");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        if fills.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        let mut touched = std::collections::HashSet::new();

        for fill in &fills {
            last_block = last_block.max(fill.block_number + 1);
            state.traders_seen.lock().expect("traders_seen lock poisoned").insert(fill.trader_address);
            touched.insert(fill.trader_address);

            let outcome = state.engine.lock().expect("pnl engine lock poisoned").apply(fill);

            if fill.side.is_closing() {
                let today = chrono::DateTime::from_timestamp(fill.block_timestamp as i64, 0)
                    .unwrap_or_else(Utc::now)
                    .date_naive();
                let entry = daily.entry(fill.trader_address).or_insert((today, dec256!(0)));
                if entry.0 != today {
                    *entry = (today, dec256!(0));
                }
                for m in &outcome.matches {
                    entry.1 += m.realized_pnl;
                    state.aux.record_daily_pnl(
                        fill.trader_address,
                        fill.block_timestamp,
                        m.realized_pnl.to_string().parse().unwrap_or(0.0),
                    );
                }
                state.daily_pnl.record(fill.trader_address, entry.1);
            } else {
                state.aux.record_leverage(fill.trader_address, fill.block_timestamp, fill.leverage_bps);
            }
        }

        state.aux.prune_all(Utc::now().timestamp() as u64);

        for trader in touched {
            let snapshot = state.engine.lock().expect("pnl engine lock poisoned").stats_for(trader);
            let row = TraderStatsRow {
                trader_address: trader,
                last_trade_ts: snapshot.last_trade_ts,
                trade_count_30d: snapshot.trade_count_30d,
                volume_usd_30d: snapshot.volume_usd_30d,
                median_trade_usd_30d: snapshot.median_trade_usd_30d,
                realized_pnl_30d: snapshot.realized_pnl_30d,
                win_rate_30d: snapshot.win_rate_30d,
                max_drawdown_30d: snapshot.max_drawdown_30d,
                last_updated: Utc::now(),
            };
            if let Err(e) = state.store.stats().upsert(&row).await {
                error!(%e, %trader, "pnl task: failed to persist trader stats");
            }
        }
    }
}

/// Recomputes the eligibility-filtered, scored, ranked leaderboard and
/// atomically replaces the read cache (§4.4's periodic refresh).
pub async fn run_leaderboard_task(state: Arc<AppState>, refresh_interval: Duration) {
    loop {
        tokio::time::sleep(refresh_interval).await;

        let now = Utc::now();
        let active_since = now - chrono::Duration::hours(state.eligibility.active_hours);
        let min_volume = fastnum::UD64::from(state.eligibility.min_volume_30d_usd as u64);

        let rows = match state
            .store
            .stats()
            .eligible_for_leaderboard(active_since, state.eligibility.min_trades_30d, min_volume)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(%e, "leaderboard task: failed to query eligible traders");
                continue;
            }
        };

        let inputs: Vec<TraderInputs> = rows
            .into_iter()
            .map(|row| TraderInputs {
                trader_address: row.trader_address,
                stats: avantis_copytrader::pnl::TraderStatsSnapshot {
                    last_trade_ts: row.last_trade_ts,
                    trade_count_30d: row.trade_count_30d,
                    volume_usd_30d: row.volume_usd_30d,
                    realized_pnl_30d: row.realized_pnl_30d,
                    win_rate_30d: row.win_rate_30d,
                    median_trade_usd_30d: row.median_trade_usd_30d,
                    max_drawdown_30d: row.max_drawdown_30d,
                },
                stddev_daily_pnl: state.aux.stddev_daily_pnl(row.trader_address),
                leverage_variance: state.aux.leverage_variance(row.trader_address),
            })
            .filter(|input| leaderboard::is_eligible(input, &state.eligibility, now))
            .collect();

        let scored = leaderboard::score_all(&inputs, &state.score_weights);
        let ranked = leaderboard::rank(scored);
        let count = ranked.len();
        state.leaderboard.replace(ranked, now);
        info!(count, "leaderboard refreshed");
    }
}

/// Turns each newly observed fill from a followed trader into per-follower
/// `CopyIntent`s, persists them idempotently, reports the outcome over chat,
/// and forwards anything buildable to the execution worker pool (§4.6).
pub async fn run_fanout_task(
    state: Arc<AppState>,
    chat: Arc<ChatBridge<RedisSharedStore>>,
    intent_tx: mpsc::Sender<CopyIntent>,
    poll_interval: Duration,
) {
    let mut last_block: u64 = 0;

    loop {
        let fills = match state.store.fills().list_from(last_block).await {
            Ok(fills) => fills,
            Err(e) => {
                error!(%e, "fanout task: failed to read fills");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        if fills.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        for fill in &fills {
            last_block = last_block.max(fill.block_number + 1);

            let followers = match state.store.follows().users_by_trader(fill.trader_address).await {
                Ok(users) => users,
                Err(e) => {
                    error!(%e, trader = %fill.trader_address, "fanout task: failed to load followers");
                    continue;
                }
            };
            if followers.is_empty() {
                continue;
            }

            let leader_equity = state.portfolio.get_equity(fill.trader_address).await.ok().flatten();
            let signal = TraderSignal {
                trader_address: fill.trader_address,
                pair_id: fill.pair_id,
                is_long: fill.is_long,
                side: fill.side,
                size_usd: fill.size_usd,
                leverage_bps: fill.leverage_bps,
                source_fill_id: fill.id.unwrap_or_default(),
                leader_equity,
            };

            let dedup_key = format!("dedup:{}", signal.dedup_key());
            let already_notified = state
                .shared
                .dedup_seen(&dedup_key, fanout::NOTIFICATION_DEDUP_TTL)
                .await
                .unwrap_or(false);

            for user_id in followers {
                let Ok(Some(cfg)) = state.store.follows().get(user_id, fill.trader_address).await else {
                    continue;
                };

                let emergency = state.gate.current_mode().await.map(|m| m.emergency_stop).unwrap_or(false);
                let intent = if emergency {
                    fanout::emergency_stop_intent(&signal, user_id)
                } else {
                    let equity = state.portfolio.get_equity(state.signer_address).await.ok().flatten();
                    match fanout::decide(&signal, user_id, &cfg, equity) {
                        FanoutDecision::NotifyOnly => {
                            if !already_notified && cfg.notify {
                                let _ = chat
                                    .emit_signal(
                                        user_id,
                                        cfg.trader_key,
                                        signal.pair_id,
                                        signal.side,
                                        signal.size_usd,
                                        signal.leverage_bps,
                                        IntentStatus::Skipped,
                                        None,
                                    )
                                    .await;
                            }
                            continue;
                        }
                        FanoutDecision::Skip(reason) => {
                            let mut intent = CopyIntent::new(
                                user_id,
                                signal.source_fill_id,
                                signal.pair_id,
                                signal.is_long,
                                signal.side,
                                fastnum::udec64!(0),
                                0,
                                0,
                            );
                            intent.skip(reason);
                            intent
                        }
                        FanoutDecision::Build(intent) => intent,
                    }
                };

                let inserted = match state.store.copy_intents().try_insert(&intent).await {
                    Ok(inserted) => inserted,
                    Err(e) => {
                        error!(%e, user_id, "fanout task: failed to persist copy intent");
                        continue;
                    }
                };
                if !inserted {
                    continue;
                }

                let _ = chat
                    .emit_signal(
                        user_id,
                        signal.trader_address,
                        signal.pair_id,
                        signal.side,
                        intent.collateral_usd,
                        intent.leverage_bps,
                        intent.status,
                        intent.reason_code,
                    )
                    .await;

                state.health.metrics().intents_by_status.with_label_values(&[intent.status.as_str()]).inc();

                if matches!(intent.status, IntentStatus::Validated) {
                    state.health.metrics().fanout_queue_depth.inc();
                    if intent_tx.send(intent).await.is_err() {
                        warn!("fanout task: execution worker channel closed");
                    }
                }
            }
        }
    }
}

/// Approximates the distance-to-liquidation price the risk validator's
/// buffer check wants, from leverage alone — the ABI exposes no
/// liquidation-price view, so this treats the position as liquidating once
/// the mark price has moved against it by `1 / leverage_ratio`, the
/// textbook isolated-margin bound before collateral is exhausted.
fn approximate_liquidation_price(mark_price: fastnum::UD64, leverage_bps: u32, is_long: bool) -> fastnum::UD64 {
    if leverage_bps == 0 {
        return fastnum::udec64!(0);
    }
    let inverse_leverage = fastnum::UD64::from(10_000u64) / fastnum::UD64::from(leverage_bps as u64);
    let offset = mark_price * inverse_leverage;
    if is_long {
        if offset > mark_price { fastnum::udec64!(0) } else { mark_price - offset }
    } else {
        mark_price + offset
    }
}

/// One execution worker: pulls intents off the shared queue and drives each
/// through the gate, risk check, chain encoding, and the tx orchestrator.
/// A pool of these share one receiver behind a mutex — `mpsc::Receiver` has
/// no native multi-consumer mode — the way a bounded worker pool is usually
/// built over a single tokio channel.
pub async fn run_exec_worker(
    worker_id: usize,
    state: Arc<AppState>,
    chat: Arc<ChatBridge<RedisSharedStore>>,
    intents: Arc<AsyncMutex<mpsc::Receiver<CopyIntent>>>,
) {
    loop {
        let intent = {
            let mut rx = intents.lock().await;
            rx.recv().await
        };
        let Some(mut intent) = intent else {
            info!(worker_id, "execution worker shutting down, channel closed");
            break;
        };
        state.health.metrics().fanout_queue_depth.dec();

        process_intent(&state, &chat, &mut intent).await;
        state.health.metrics().intents_by_status.with_label_values(&[intent.status.as_str()]).inc();
    }
}

async fn process_intent(state: &Arc<AppState>, chat: &Arc<ChatBridge<RedisSharedStore>>, intent: &mut CopyIntent) {
    if let Err(reason) = check_gate(state, intent).await {
        finish_as_skipped(state, chat, intent, reason).await;
        return;
    }

    let risk_input = match build_risk_input(state, intent).await {
        Ok(input) => input,
        Err(reason) => {
            finish_as_skipped(state, chat, intent, reason).await;
            return;
        }
    };

    if let Err(reason) = risk::validate(&risk_input, &state.risk_limits, Utc::now()) {
        finish_as_skipped(state, chat, intent, reason).await;
        return;
    }

    let calldata = match build_calldata(state, intent).await {
        Ok(data) => data,
        Err(reason) => {
            finish_as_skipped(state, chat, intent, reason).await;
            return;
        }
    };

    let nonce = match state.tx.next_nonce().await {
        Ok(nonce) => nonce,
        Err(e) => {
            error!(%e, intent_id = %intent.intent_id, "failed to allocate nonce");
            finish_as_failed(state, chat, intent, ReasonCode::Overload).await;
            return;
        }
    };

    let fees = match state.chain.fee_history().await {
        Ok(suggestion) => state.tx.price_fees(suggestion),
        Err(e) => {
            error!(%e, intent_id = %intent.intent_id, "failed to fetch fee history");
            finish_as_failed(state, chat, intent, ReasonCode::Overload).await;
            return;
        }
    };

    let tx_intent = tx::build_tx_intent(
        intent.intent_id,
        nonce,
        state.chain.exchange(),
        calldata,
        U256::ZERO,
        EXEC_GAS_LIMIT,
        fees.0,
        fees.1,
    );

    intent.status = IntentStatus::Submitted;
    let _ = state.store.copy_intents().set_status(intent.intent_id, intent.status, None, None).await;

    let submitted = match state.tx.submit(tx_intent).await {
        Ok(tx) => tx,
        Err(e) => {
            error!(%e, intent_id = %intent.intent_id, "failed to submit transaction");
            finish_as_failed(state, chat, intent, ReasonCode::Reverted).await;
            return;
        }
    };

    match state.tx.confirm(submitted).await {
        Ok(Outcome::Confirmed { tx_hash }) => {
            intent.status = IntentStatus::Confirmed;
            intent.tx_hash = Some(tx_hash);
            let _ = state
                .store
                .copy_intents()
                .set_status(intent.intent_id, intent.status, None, Some(tx_hash))
                .await;
            if matches!(intent.side, FillSide::Open) {
                if let Some(trade_id) = recover_trade_id(state, intent, tx_hash).await {
                    state
                        .open_trade_ids
                        .lock()
                        .expect("open_trade_ids lock poisoned")
                        .insert((intent.user_id, intent.pair_id), trade_id);
                }
            } else {
                state.open_trade_ids.lock().expect("open_trade_ids lock poisoned").remove(&(intent.user_id, intent.pair_id));
            }
            let _ = chat.emit_intent_update(intent.intent_id, intent.status, intent.tx_hash, None).await;
        }
        Ok(Outcome::Failed { reason }) => {
            finish_as_failed(state, chat, intent, reason).await;
        }
        Err(e) => {
            error!(%e, intent_id = %intent.intent_id, "failed to confirm transaction");
            finish_as_failed(state, chat, intent, ReasonCode::Stuck).await;
        }
    }
}

async fn check_gate(state: &AppState, intent: &CopyIntent) -> Result<(), ReasonCode> {
    state.gate.check_mode().await.map_err(gate_reason)?;
    state
        .gate
        .check_rate_limits(intent.user_id, matches!(intent.side, FillSide::Open), intent.collateral_usd)
        .await
        .map_err(gate_reason)
}

fn gate_reason(outcome: avantis_copytrader::exec::GateOutcome) -> ReasonCode {
    match outcome {
        avantis_copytrader::exec::GateOutcome::Rejected(reason) => reason,
        avantis_copytrader::exec::GateOutcome::Error(_) => ReasonCode::Overload,
    }
}

async fn build_risk_input(state: &AppState, intent: &CopyIntent) -> Result<RiskInput, ReasonCode> {
    let trader = state.signer_address;
    let equity = state.portfolio.get_equity(trader).await.map_err(|_| ReasonCode::NoEquity)?;
    let daily_pnl = state.portfolio.get_daily_pnl(trader).await.unwrap_or(dec256!(0));

    let quote = state.price.get_price(intent.pair_id).await.ok();
    let fresh = quote
        .as_ref()
        .map(|q| q.is_fresh(Utc::now(), state.risk_limits.price_max_age_secs))
        .unwrap_or(false);
    state.health.record_price_freshness(fresh);
    if let Some(q) = &quote {
        state.health.metrics().price_staleness_seconds.set(q.age_secs(Utc::now()));
    }
    let mark_price = quote.map(|q| q.price).unwrap_or(fastnum::udec64!(0));
    let liquidation_price = approximate_liquidation_price(mark_price, intent.leverage_bps, intent.is_long);

    Ok(RiskInput {
        trader,
        collateral_usd: intent.collateral_usd,
        leverage_bps: intent.leverage_bps,
        equity,
        daily_pnl,
        start_of_day_equity: equity.unwrap_or(fastnum::udec64!(0)),
        primary_price: quote,
        secondary_price: quote,
        mark_price,
        liquidation_price,
    })
}

async fn build_calldata(state: &AppState, intent: &CopyIntent) -> Result<alloy::primitives::Bytes, ReasonCode> {
    let instance = ExchangeInstance::new(state.chain.exchange(), state.chain.provider().clone());

    match intent.side {
        FillSide::Open => {
            let collateral_raw = Converter::new(state.collateral_decimals).to_unsigned(intent.collateral_usd);
            let call = instance.openTrade(
                intent.pair_id,
                intent.is_long,
                collateral_raw,
                intent.leverage_bps,
                U256::from(intent.slippage_bps),
            );
            Ok(call.calldata().clone())
        }
        FillSide::Close | FillSide::Liquidation => {
            let trade_id = state
                .open_trade_ids
                .lock()
                .expect("open_trade_ids lock poisoned")
                .get(&(intent.user_id, intent.pair_id))
                .copied()
                .ok_or(ReasonCode::PositionNotFound)?;

            let (_, size_decimals) = instance
                .getPairDecimals(intent.pair_id)
                .call()
                .await
                .map_err(|_| ReasonCode::PositionNotFound)?;
            let size_raw = Converter::new(size_decimals).to_unsigned(intent.collateral_usd);

            let call = instance.closeTrade(intent.pair_id, trade_id, size_raw, U256::from(intent.slippage_bps));
            Ok(call.calldata().clone())
        }
    }
}

/// Recovers the trade id the exchange assigned an `openTrade` call by
/// decoding the `TradeOpened` log off the confirmed receipt — the call is
/// broadcast as a raw signed transaction rather than through a provider that
/// could hand back the decoded return value directly.
async fn recover_trade_id(state: &AppState, intent: &CopyIntent, tx_hash: alloy::primitives::TxHash) -> Option<U256> {
    use avantis_copytrader::abi::dex::Exchange::ExchangeEvents;

    let receipt = state.chain.get_transaction_receipt(tx_hash).await.ok().flatten()?;
    for log in receipt.inner.logs() {
        if let Ok(decoded) = ExchangeEvents::decode_log(&log.inner) {
            if let ExchangeEvents::TradeOpened(ev) = decoded.data {
                if ev.pairId == intent.pair_id {
                    return Some(ev.tradeId);
                }
            }
        }
    }
    None
}

async fn finish_as_skipped(state: &Arc<AppState>, chat: &Arc<ChatBridge<RedisSharedStore>>, intent: &mut CopyIntent, reason: ReasonCode) {
    intent.skip(reason);
    let _ = state.store.copy_intents().set_status(intent.intent_id, intent.status, Some(reason), None).await;
    let _ = chat.emit_intent_update(intent.intent_id, intent.status, None, Some(reason)).await;
}

async fn finish_as_failed(state: &Arc<AppState>, chat: &Arc<ChatBridge<RedisSharedStore>>, intent: &mut CopyIntent, reason: ReasonCode) {
    intent.fail(reason);
    let _ = state.store.copy_intents().set_status(intent.intent_id, intent.status, Some(reason), None).await;
    let _ = chat.emit_intent_update(intent.intent_id, intent.status, None, Some(reason)).await;
}
