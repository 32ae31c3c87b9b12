//! Prometheus metrics (C11). One process-wide [`Registry`] is created at
//! boot and threaded into every component that reports a metric — nothing
//! here is a global static (§4.9).

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub indexer_blocks_total: IntCounter,
    pub fills_total: IntCounter,
    pub intents_by_status: IntCounterVec,
    pub tx_attempts_total: IntCounter,
    pub tx_confirm_latency_seconds: Histogram,
    pub price_staleness_seconds: IntGauge,
    pub fanout_queue_depth: IntGauge,
    pub rate_limiter_rejections_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let indexer_blocks_total = IntCounter::with_opts(
            Opts::new("indexer_blocks_total", "Blocks processed by the indexer").namespace("copytrader"),
        )?;
        registry.register(Box::new(indexer_blocks_total.clone()))?;

        let fills_total = IntCounter::with_opts(
            Opts::new("fills_total", "Fills committed to the relational store").namespace("copytrader"),
        )?;
        registry.register(Box::new(fills_total.clone()))?;

        let intents_by_status = IntCounterVec::new(
            Opts::new("intents_total", "Copy intents by terminal status").namespace("copytrader"),
            &["status"],
        )?;
        registry.register(Box::new(intents_by_status.clone()))?;

        let tx_attempts_total = IntCounter::with_opts(
            Opts::new("tx_attempts_total", "Transaction broadcast attempts, including replacements")
                .namespace("copytrader"),
        )?;
        registry.register(Box::new(tx_attempts_total.clone()))?;

        let tx_confirm_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("tx_confirm_latency_seconds", "Time from broadcast to confirmed receipt")
                .namespace("copytrader")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0]),
        )?;
        registry.register(Box::new(tx_confirm_latency_seconds.clone()))?;

        let price_staleness_seconds = IntGauge::with_opts(
            Opts::new("price_staleness_seconds", "Age of the freshest price quote seen").namespace("copytrader"),
        )?;
        registry.register(Box::new(price_staleness_seconds.clone()))?;

        let fanout_queue_depth = IntGauge::with_opts(
            Opts::new("fanout_queue_depth", "Pending signals awaiting fanout").namespace("copytrader"),
        )?;
        registry.register(Box::new(fanout_queue_depth.clone()))?;

        let rate_limiter_rejections_total = IntCounter::with_opts(
            Opts::new("rate_limiter_rejections_total", "Intents rejected by a rate limit bucket")
                .namespace("copytrader"),
        )?;
        registry.register(Box::new(rate_limiter_rejections_total.clone()))?;

        Ok(Self {
            registry,
            indexer_blocks_total,
            fills_total,
            intents_by_status,
            tx_attempts_total,
            tx_confirm_latency_seconds,
            price_staleness_seconds,
            fanout_queue_depth,
            rate_limiter_rejections_total,
        })
    }

    /// Renders the registered families in Prometheus text-exposition format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_metric_name_errors() {
        let metrics = Metrics::new().unwrap();
        metrics.fills_total.inc();
        metrics.intents_by_status.with_label_values(&["CONFIRMED"]).inc();
        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("copytrader_fills_total"));
        assert!(encoded.contains("copytrader_intents_total"));
    }
}
