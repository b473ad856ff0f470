// crates/group-memory/src/metrics.rs

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static MESSAGES_APPENDED: OnceLock<IntCounterVec> = OnceLock::new();
static CHUNKS_CREATED: OnceLock<IntCounterVec> = OnceLock::new();
static RUNS_DROPPED: OnceLock<IntCounterVec> = OnceLock::new();
static CYCLES: OnceLock<IntCounterVec> = OnceLock::new();
static CYCLE_DURATION: OnceLock<Histogram> = OnceLock::new();
static CYCLE_RUNNING: OnceLock<IntGauge> = OnceLock::new();
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

fn register<M>(cell: &OnceLock<M>, build: impl FnOnce() -> prometheus::Result<M>) -> prometheus::Result<()>
where
    M: Collector + Clone + 'static,
{
    if cell.get().is_none() {
        let metric = build()?;
        if cell.set(metric.clone()).is_ok() {
            REGISTRY.register(Box::new(metric))?;
        }
    }
    Ok(())
}

/// Register pipeline metrics. Until this is called every helper below is a no-op,
/// which keeps library users and tests free of global registry state.
pub fn init_metrics() -> prometheus::Result<()> {
    register(&MESSAGES_APPENDED, || {
        IntCounterVec::new(
            prometheus::opts!("memory_messages_appended_total", "Append calls by outcome"),
            &["outcome"],
        )
    })?;
    register(&CHUNKS_CREATED, || {
        IntCounterVec::new(
            prometheus::opts!("memory_chunks_created_total", "Chunks written by the consolidation engine"),
            &["mode"],
        )
    })?;
    register(&RUNS_DROPPED, || {
        IntCounterVec::new(
            prometheus::opts!("memory_runs_dropped_total", "Runs consolidated without a chunk"),
            &["reason"],
        )
    })?;
    register(&CYCLES, || {
        IntCounterVec::new(
            prometheus::opts!("memory_consolidation_cycles_total", "Consolidation cycles by outcome"),
            &["outcome"],
        )
    })?;
    register(&CYCLE_DURATION, || {
        Histogram::with_opts(HistogramOpts::new(
            "memory_consolidation_cycle_seconds",
            "Wall-clock time of one consolidation cycle",
        ))
    })?;
    register(&CYCLE_RUNNING, || {
        IntGauge::new("memory_consolidation_running", "1 while a cycle is in progress")
    })?;
    register(&REQ_COUNTER, || {
        IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"],
        )
    })?;
    Ok(())
}

pub fn inc_message(inserted: bool) {
    if let Some(counter) = MESSAGES_APPENDED.get() {
        counter
            .with_label_values(&[if inserted { "inserted" } else { "duplicate" }])
            .inc();
    }
}

pub fn inc_chunk(mode: &str) {
    if let Some(counter) = CHUNKS_CREATED.get() {
        counter.with_label_values(&[mode]).inc();
    }
}

pub fn inc_run_dropped(reason: &str) {
    if let Some(counter) = RUNS_DROPPED.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

pub fn inc_cycle(outcome: &str) {
    if let Some(counter) = CYCLES.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn observe_cycle(duration: f64) {
    if let Some(histogram) = CYCLE_DURATION.get() {
        histogram.observe(duration);
    }
}

pub fn set_cycle_running(running: bool) {
    if let Some(gauge) = CYCLE_RUNNING.get() {
        gauge.set(i64::from(running));
    }
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

/// Prometheus text exposition of everything registered so far
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}
