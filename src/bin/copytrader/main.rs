//! Copy-trading pipeline binary: wires the indexer, PnL engine, leaderboard,
//! fanout, risk, and tx orchestrator library modules into one long-running
//! service, following the margin top-up bot's own boot sequence — load
//! environment, parse flags, build collaborators, run, with every fallible
//! step's failure printed and `exit(1)` before logging is even up.

mod aux_stats;
mod error;
mod state;
mod tasks;

use std::process::exit;
use std::sync::{Arc, Mutex as StdMutex};

use alloy::providers::{DynProvider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::transports::layers::RetryBackoffLayer;
use clap::Parser;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use avantis_copytrader::abi::dex::Exchange::ExchangeInstance;
use avantis_copytrader::chain::ChainClient;
use avantis_copytrader::chat::{ChatBridge, ChatEvent};
use avantis_copytrader::config::{CliConfig, EnvConfig};
use avantis_copytrader::exec::ExecGate;
use avantis_copytrader::health::{self, HealthState, Metrics};
use avantis_copytrader::indexer::{Indexer, IndexerAlert};
use avantis_copytrader::leaderboard::LeaderboardCache;
use avantis_copytrader::pnl::PnlEngine;
use avantis_copytrader::portfolio::{DailyPnlFeed, OnChainPortfolioProvider};
use avantis_copytrader::price::ChainPriceProvider;
use avantis_copytrader::signer::{LocalSigner, Signer};
use avantis_copytrader::store::pg::PgStore;
use avantis_copytrader::store::shared::RedisSharedStore;
use avantis_copytrader::tx::{TxOrchestrator, TxTunables};

use aux_stats::AuxStats;
use error::BootError;
use state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: failed to load .env file: {e}");
    }

    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {e}");
            exit(1);
        }
    };

    let cli = CliConfig::parse();

    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", &env_config.rust_log);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(env_config, cli).await {
        error!(%e, "copytrader exited with a fatal error");
        exit(1);
    }
}

async fn run(env: EnvConfig, cli: CliConfig) -> Result<(), BootError> {
    let exchange_address = env.exchange_address()?;
    let rpc_url = env.base_rpc_url()?;

    let rpc_client = RpcClient::builder()
        .layer(RetryBackoffLayer::new(8, 250, 200))
        .connect(rpc_url.as_str())
        .await
        .map_err(|e| avantis_copytrader::error::ChainError::Fatal(e.to_string()))?;
    let provider: DynProvider = DynProvider::new(ProviderBuilder::new().connect_client(rpc_client));

    let chain = Arc::new(ChainClient::new(provider.clone(), exchange_address).with_page(cli.indexer_page));

    info!(chain_id = env.chain_id, %exchange_address, "connected to chain RPC");

    let instance = ExchangeInstance::new(exchange_address, provider.clone());
    let collateral_decimals = instance
        .collateralDecimals()
        .call()
        .await
        .map_err(avantis_copytrader::error::ChainError::from)?;

    let pg = PgStore::connect(&env.database_url).await?;
    let shared = RedisSharedStore::connect(&env.redis_url).await?;

    let signer = LocalSigner::from_private_key(&env.private_key)?;
    let signer_address = signer.address();
    info!(%signer_address, "execution signer loaded");

    let tx_tunables = TxTunables { chain_id: env.chain_id, ..TxTunables::default() };
    let metrics = Metrics::new()?;
    let tx = TxOrchestrator::new(chain.clone(), signer, shared.clone(), pg.tx_intents(), tx_tunables, metrics.clone());
    tx.seed_nonce().await?;

    let daily_pnl = DailyPnlFeed::new();
    let portfolio = OnChainPortfolioProvider::new(chain.clone(), collateral_decimals, daily_pnl.clone());
    let price = ChainPriceProvider::new(chain.clone());

    let risk_limits = cli.to_risk_limits()?;
    let rate_limits = cli.to_rate_limits()?;
    let gate = ExecGate::new(shared.clone(), rate_limits, metrics.clone());
    gate.set_mode(cli.to_exec_mode()?, 0).await.map_err(avantis_copytrader::error::CoreError::SharedStore)?;
    gate.set_emergency_stop(cli.emergency_stop, 0).await.map_err(avantis_copytrader::error::CoreError::SharedStore)?;

    let health = Arc::new(HealthState::new(pg.clone(), shared.clone(), metrics.clone(), cli.indexer_alarm_threshold));

    let state = Arc::new(AppState {
        store: pg.clone(),
        chain: chain.clone(),
        shared: shared.clone(),
        health: health.clone(),
        engine: StdMutex::new(PnlEngine::new()),
        aux: AuxStats::new(),
        daily_pnl,
        traders_seen: StdMutex::new(Default::default()),
        leaderboard: LeaderboardCache::new(),
        eligibility: cli.to_eligibility_thresholds(),
        score_weights: Default::default(),
        risk_limits,
        gate,
        portfolio,
        price,
        tx,
        signer_address,
        collateral_decimals,
        open_trade_ids: StdMutex::new(Default::default()),
    });

    let (indexer, mut alerts) =
        Indexer::new(chain.clone(), env.chain_id, pg.clone(), cli.to_indexer_tunables(), metrics.clone());
    indexer.ensure_schema().await?;
    let indexer = Arc::new(indexer);

    let (chat_tx, mut chat_rx) = mpsc::channel::<ChatEvent>(256);
    let chat = Arc::new(ChatBridge::new(
        pg.follows(),
        ExecGate::new(shared.clone(), rate_limits, metrics.clone()),
        state.leaderboard.clone(),
        chat_tx,
    ));

    let (intent_tx, intent_rx) = mpsc::channel(1024);
    let intent_rx = Arc::new(AsyncMutex::new(intent_rx));

    let mut tasks = tokio::task::JoinSet::new();

    {
        let indexer = indexer.clone();
        tasks.spawn(async move {
            if let Err(e) = indexer.run().await {
                error!(%e, "indexer task stopped");
            }
        });
    }

    {
        let health = health.clone();
        tasks.spawn(async move {
            while let Ok(alert) = alerts.recv().await {
                match alert {
                    IndexerAlert::Progress { last_seen_block, latest_block } => {
                        health.record_block_observed();
                        health.record_indexer_lag(latest_block.saturating_sub(last_seen_block));
                    }
                    other => warn!(?other, "indexer alert"),
                }
            }
        });
    }

    tasks.spawn(async move {
        while let Some(event) = chat_rx.recv().await {
            info!(?event, "chat event emitted");
        }
    });

    {
        let state = state.clone();
        let interval = cli.pnl_poll_interval();
        tasks.spawn(async move { tasks::run_pnl_task(state, interval).await });
    }

    {
        let state = state.clone();
        let interval = cli.leaderboard_refresh_interval();
        tasks.spawn(async move { tasks::run_leaderboard_task(state, interval).await });
    }

    {
        let state = state.clone();
        let chat = chat.clone();
        let interval = cli.fanout_poll_interval();
        tasks.spawn(async move { tasks::run_fanout_task(state, chat, intent_tx, interval).await });
    }

    for worker_id in 0..cli.exec_worker_pool_size {
        let state = state.clone();
        let chat = chat.clone();
        let intent_rx = intent_rx.clone();
        tasks.spawn(async move { tasks::run_exec_worker(worker_id, state, chat, intent_rx).await });
    }

    {
        let router = health::router(health.clone());
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", env.health_port)).await?;
        info!(port = env.health_port, "health server listening");
        tasks.spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(%e, "health server stopped");
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining in-flight work");
        }
    }

    tasks.abort_all();
    let _ = tokio::time::timeout(cli.drain_timeout(), async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    Ok(())
}
