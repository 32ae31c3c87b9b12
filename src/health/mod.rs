//! Health & metrics (C11): `/healthz`, `/readyz`, and `/metrics`, served by a
//! lightweight async HTTP server bound to `HEALTH_PORT` (§4.9).

pub mod metrics;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

pub use metrics::Metrics;
use crate::store::{PgStore, SharedStore};

const CHAIN_LIVENESS_MAX_AGE: Duration = Duration::from_secs(30);

/// Readiness inputs updated by the long-lived tasks as they do their own
/// I/O; `/readyz` only ever reads this snapshot, it never probes the chain
/// or price provider itself (§4.9).
#[derive(Clone, Copy, Debug, Default)]
struct Readiness {
    chain_last_block_at: Option<Instant>,
    indexer_lag_blocks: Option<u64>,
    indexer_alarm_threshold: u64,
    price_fresh: bool,
}

pub struct HealthState<Sh> {
    pg: PgStore,
    shared: Sh,
    metrics: Metrics,
    readiness: Mutex<Readiness>,
}

impl<Sh: SharedStore> HealthState<Sh> {
    pub fn new(pg: PgStore, shared: Sh, metrics: Metrics, indexer_alarm_threshold: u64) -> Self {
        Self {
            pg,
            shared,
            metrics,
            readiness: Mutex::new(Readiness {
                indexer_alarm_threshold,
                ..Readiness::default()
            }),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn record_block_observed(&self) {
        self.readiness.lock().unwrap().chain_last_block_at = Some(Instant::now());
    }

    pub fn record_indexer_lag(&self, lag_blocks: u64) {
        self.readiness.lock().unwrap().indexer_lag_blocks = Some(lag_blocks);
    }

    pub fn record_price_freshness(&self, fresh: bool) {
        self.readiness.lock().unwrap().price_fresh = fresh;
    }
}

#[derive(Serialize)]
struct ReadinessReport {
    db: ComponentStatus,
    shared_store: ComponentStatus,
    chain_client: ComponentStatus,
    indexer_lag: ComponentStatus,
    price_provider: ComponentStatus,
}

#[derive(Serialize)]
struct ComponentStatus {
    ok: bool,
    detail: String,
}

impl ReadinessReport {
    fn all_ok(&self) -> bool {
        self.db.ok && self.shared_store.ok && self.chain_client.ok && self.indexer_lag.ok && self.price_provider.ok
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz<Sh: SharedStore>(State(state): State<Arc<HealthState<Sh>>>) -> impl IntoResponse {
    let db = match state.pg.ping().await {
        Ok(()) => ComponentStatus { ok: true, detail: "reachable".to_string() },
        Err(e) => ComponentStatus { ok: false, detail: e.to_string() },
    };

    let shared_store = match state.shared.get_exec_mode().await {
        Ok(_) => ComponentStatus { ok: true, detail: "reachable".to_string() },
        Err(e) => ComponentStatus { ok: false, detail: e.to_string() },
    };

    let snapshot = *state.readiness.lock().unwrap();

    let chain_client = match snapshot.chain_last_block_at {
        Some(at) if at.elapsed() <= CHAIN_LIVENESS_MAX_AGE => {
            ComponentStatus { ok: true, detail: format!("last block {}s ago", at.elapsed().as_secs()) }
        }
        Some(at) => ComponentStatus {
            ok: false,
            detail: format!("stale: last block {}s ago", at.elapsed().as_secs()),
        },
        None => ComponentStatus { ok: false, detail: "no block observed yet".to_string() },
    };

    let indexer_lag = match snapshot.indexer_lag_blocks {
        Some(lag) if lag <= snapshot.indexer_alarm_threshold => {
            ComponentStatus { ok: true, detail: format!("{lag} blocks behind head") }
        }
        Some(lag) => ComponentStatus { ok: false, detail: format!("{lag} blocks behind head, over threshold") },
        None => ComponentStatus { ok: false, detail: "no indexer report yet".to_string() },
    };

    let price_provider = ComponentStatus {
        ok: snapshot.price_fresh,
        detail: if snapshot.price_fresh { "fresh".to_string() } else { "stale or unreported".to_string() },
    };

    let report = ReadinessReport { db, shared_store, chain_client, indexer_lag, price_provider };
    let status = if report.all_ok() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report))
}

async fn metrics_handler<Sh: SharedStore>(State(state): State<Arc<HealthState<Sh>>>) -> impl IntoResponse {
    match state.metrics().encode() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router<Sh: SharedStore + 'static>(state: Arc<HealthState<Sh>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<Sh>))
        .route("/metrics", get(metrics_handler::<Sh>))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_defaults_to_not_ready() {
        // Indexer lag and chain liveness default to "not yet reported", which
        // must read as not-ready rather than vacuously ready.
        let readiness = Readiness { indexer_alarm_threshold: 50, ..Readiness::default() };
        assert!(readiness.chain_last_block_at.is_none());
        assert!(readiness.indexer_lag_blocks.is_none());
        assert!(!readiness.price_fresh);
    }

    #[test]
    fn indexer_lag_within_threshold_is_ok() {
        let readiness = Readiness { indexer_lag_blocks: Some(5), indexer_alarm_threshold: 50, ..Readiness::default() };
        assert!(readiness.indexer_lag_blocks.unwrap() <= readiness.indexer_alarm_threshold);
    }
}
