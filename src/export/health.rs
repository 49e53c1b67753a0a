use anyhow::Result;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// Prometheus metrics for agent health and observability.
///
/// All metrics use the "linklens" namespace. They cover the delivery
/// pipeline and analysis pass timing; the analytical counters themselves
/// live in the engine and are served over the API.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,

    /// Total valid events accepted into the buffer.
    pub events_ingested: Counter,
    /// Total events dropped during validation.
    pub events_malformed: Counter,
    /// Total delivered batches.
    pub batches_received: Counter,
    /// Current size of the buffered event log.
    pub buffered_events: Gauge,
    /// Full analysis pass duration (1ms-5s buckets).
    pub reanalyze_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let events_ingested = Counter::with_opts(
            Opts::new(
                "events_ingested_total",
                "Total valid events accepted into the buffer.",
            )
            .namespace("linklens"),
        )?;
        let events_malformed = Counter::with_opts(
            Opts::new(
                "events_malformed_total",
                "Total events dropped during validation.",
            )
            .namespace("linklens"),
        )?;
        let batches_received = Counter::with_opts(
            Opts::new("batches_received_total", "Total delivered batches.")
                .namespace("linklens"),
        )?;
        let buffered_events = Gauge::with_opts(
            Opts::new(
                "buffered_events",
                "Current size of the buffered event log.",
            )
            .namespace("linklens"),
        )?;
        let reanalyze_duration = Histogram::with_opts(
            HistogramOpts::new(
                "reanalyze_duration_seconds",
                "Time to recompute a full analysis snapshot.",
            )
            .namespace("linklens")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(events_ingested.clone()))?;
        registry.register(Box::new(events_malformed.clone()))?;
        registry.register(Box::new(batches_received.clone()))?;
        registry.register(Box::new(buffered_events.clone()))?;
        registry.register(Box::new(reanalyze_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            events_ingested,
            events_malformed,
            batches_received,
            buffered_events,
            reanalyze_duration,
        })
    }

    /// The registry backing the /metrics endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The configured listen address for the serving layer.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}
