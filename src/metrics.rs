//! Prometheus text exposition for `GET /metrics` (spec §6.1).

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RESOLUTION_QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("resolution_queue_depth", "Resolution queue job count by state"),
        &["state"],
    )
    .expect("metric is well-formed");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registers once");
    gauge
});

pub static INGEST_CIRCUIT_BREAKER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "live_data_circuit_breaker_state",
            "0=closed, 1=half_open, 2=open, by league",
        ),
        &["league"],
    )
    .expect("metric is well-formed");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registers once");
    gauge
});

pub static RATE_LIMIT_DENIALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("rate_limit_denials_total", "Rate limiter denials by kind"),
        &["kind"],
    )
    .expect("metric is well-formed");
    REGISTRY.register(Box::new(counter.clone())).expect("metric registers once");
    counter
});

pub static BET_LIFECYCLE_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("bet_lifecycle_transitions_total", "Bet status transitions by target status"),
        &["status"],
    )
    .expect("metric is well-formed");
    REGISTRY.register(Box::new(counter.clone())).expect("metric registers once");
    counter
});

/// Forces registration of every metric above at startup, so the first
/// scrape never misses a family that happened not to be touched yet.
pub fn init() {
    Lazy::force(&RESOLUTION_QUEUE_DEPTH);
    Lazy::force(&INGEST_CIRCUIT_BREAKER_STATE);
    Lazy::force(&RATE_LIMIT_DENIALS_TOTAL);
    Lazy::force(&BET_LIFECYCLE_TRANSITIONS_TOTAL);
}

pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
