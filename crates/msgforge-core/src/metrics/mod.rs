//! Prometheus metrics registry, defined once with a fixed label schema (§9's redesign
//! flag: no `post_id`/`channel_username` labels — cardinality is bounded by design).

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Events published, labeled by stream and outcome.
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("events_published_total", "Total events published to the bus")
            .namespace("msgforge").subsystem("bus"),
        &["stream", "outcome"]
    ).unwrap();

    /// Events consumed, labeled by stream, group, and outcome (ok/retry/dlq).
    pub static ref EVENTS_CONSUMED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("events_consumed_total", "Total events consumed from the bus")
            .namespace("msgforge").subsystem("bus"),
        &["stream", "group", "outcome"]
    ).unwrap();

    pub static ref EVENT_PROCESSING_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("event_processing_duration_seconds", "Time to process one entry end to end")
            .namespace("msgforge").subsystem("bus")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["stream", "group"]
    ).unwrap();

    /// Pending-entry-list depth per consumer group, sampled periodically.
    pub static ref PEL_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pel_depth", "Pending entry list depth").namespace("msgforge").subsystem("bus"),
        &["stream", "group"]
    ).unwrap();

    pub static ref DLQ_BACKLOG: IntGaugeVec = IntGaugeVec::new(
        Opts::new("dlq_backlog", "Unreplayed DLQ entries").namespace("msgforge").subsystem("bus"),
        &["stream"]
    ).unwrap();

    /// Restarts issued by the task supervisor, labeled by task name only.
    pub static ref TASK_RESTARTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("task_restarts_total", "Supervisor-issued task restarts").namespace("msgforge").subsystem("supervisor"),
        &["task"]
    ).unwrap();

    pub static ref TASK_HEALTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("task_health", "1 if the task is running, 0 otherwise").namespace("msgforge").subsystem("supervisor"),
        &["task"]
    ).unwrap();

    /// Policy skips (quota/SSRF/deny-list), labeled by component and reason — never by
    /// tenant or post, per the cardinality rule.
    pub static ref POLICY_SKIPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("policy_skips_total", "Non-error policy denials").namespace("msgforge").subsystem("policy"),
        &["component", "reason"]
    ).unwrap();

    pub static ref CIRCUIT_BREAKER_STATE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("circuit_breaker_state", "0=closed 1=half_open 2=open").namespace("msgforge").subsystem("policy"),
        &["provider"]
    ).unwrap();

    /// Album assembly outcomes, labeled by outcome only (assembled/expired) — never by
    /// `group_id` or tenant.
    pub static ref ALBUM_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("album_outcomes_total", "Album assembly state machine outcomes").namespace("msgforge").subsystem("albums"),
        &["outcome"]
    ).unwrap();
}

/// Registers every metric above with [`REGISTRY`]. Call once at process startup.
pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED_TOTAL.clone()),
        Box::new(EVENTS_CONSUMED_TOTAL.clone()),
        Box::new(EVENT_PROCESSING_DURATION.clone()),
        Box::new(PEL_DEPTH.clone()),
        Box::new(DLQ_BACKLOG.clone()),
        Box::new(TASK_RESTARTS_TOTAL.clone()),
        Box::new(TASK_HEALTH.clone()),
        Box::new(POLICY_SKIPS_TOTAL.clone()),
        Box::new(CIRCUIT_BREAKER_STATE.clone()),
        Box::new(ALBUM_OUTCOMES_TOTAL.clone()),
    ];
    for collector in collectors {
        let _ = REGISTRY.register(collector);
    }
}

/// Renders the registry in Prometheus text exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_render_produces_text() {
        init();
        init();
        EVENTS_PUBLISHED_TOTAL.with_label_values(&["posts.parsed", "ok"]).inc();
        let text = render();
        assert!(text.contains("msgforge_bus_events_published_total"));
    }
}
