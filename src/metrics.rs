//! Counters for chain and backend activity.
//!
//! Orchestrators only see the [`Metrics`] trait. `PrometheusMetrics` keeps its
//! own registry; exposing it over HTTP is left to the embedding process.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub trait Metrics: Send + Sync + 'static {
    fn tx_submitted(&self, _op: &'static str) {}
    fn tx_failed(&self, _op: &'static str, _kind: &'static str) {}
    fn rpc_probe(&self, _chain_id: u64, _ok: bool) {}
    fn sync_result(&self, _outcome: &'static str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    tx_submitted: IntCounterVec,
    tx_failed: IntCounterVec,
    rpc_probes: IntCounterVec,
    sync_results: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let tx_submitted = IntCounterVec::new(
            Opts::new("launchpad_tx_submitted_total", "Transactions submitted"),
            &["op"],
        )?;
        let tx_failed = IntCounterVec::new(
            Opts::new("launchpad_tx_failed_total", "Transactions that failed"),
            &["op", "kind"],
        )?;
        let rpc_probes = IntCounterVec::new(
            Opts::new("launchpad_rpc_probes_total", "RPC connectivity probes"),
            &["chain_id", "result"],
        )?;
        let sync_results = IntCounterVec::new(
            Opts::new("launchpad_backend_sync_total", "Backend sync outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_failed.clone()))?;
        registry.register(Box::new(rpc_probes.clone()))?;
        registry.register(Box::new(sync_results.clone()))?;

        Ok(Self { registry, tx_submitted, tx_failed, rpc_probes, sync_results })
    }

    /// Text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Metrics for PrometheusMetrics {
    fn tx_submitted(&self, op: &'static str) {
        self.tx_submitted.with_label_values(&[op]).inc();
    }

    fn tx_failed(&self, op: &'static str, kind: &'static str) {
        self.tx_failed.with_label_values(&[op, kind]).inc();
    }

    fn rpc_probe(&self, chain_id: u64, ok: bool) {
        let chain = chain_id.to_string();
        let result = if ok { "ok" } else { "fail" };
        self.rpc_probes.with_label_values(&[chain.as_str(), result]).inc();
    }

    fn sync_result(&self, outcome: &'static str) {
        self.sync_results.with_label_values(&[outcome]).inc();
    }
}
