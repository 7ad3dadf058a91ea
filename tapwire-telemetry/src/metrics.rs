use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Process-wide capture metrics. Clones share the same underlying series.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub packets: IntCounter,
    pub streams_opened: IntCounter,
    pub streams_ignored: IntCounter,
    pub entries: IntCounter,
    pub parse_failures: IntCounter,
    pub incomplete_messages: IntCounter,
    pub dropped_segments: IntCounter,
    pub outbound_links: IntCounter,
    pub active_streams: IntGauge,
    /// Chunks enqueued to readers and not yet consumed.
    pub queued_chunks: IntGauge,
    pub entry_latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter descriptor");
    registry
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge descriptor");
    registry
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();

        let entry_latency = Histogram::with_opts(
            HistogramOpts::new(
                "tapwire_entry_latency_ms",
                "Time from first request byte to last response byte",
            )
            .buckets(vec![1.0, 5.0, 25.0, 100.0, 500.0, 2_500.0, 10_000.0]),
        )
        .expect("valid histogram descriptor");
        registry
            .register(Box::new(entry_latency.clone()))
            .expect("histogram registered once");

        Self {
            packets: counter(&registry, "tapwire_packets_total", "Captured TCP segments"),
            streams_opened: counter(
                &registry,
                "tapwire_streams_opened_total",
                "Connections selected for HTTP parsing",
            ),
            streams_ignored: counter(
                &registry,
                "tapwire_streams_ignored_total",
                "Connections tracked without parsing",
            ),
            entries: counter(&registry, "tapwire_entries_total", "Correlated entries emitted"),
            parse_failures: counter(
                &registry,
                "tapwire_parse_failures_total",
                "Directions abandoned on malformed HTTP",
            ),
            incomplete_messages: counter(
                &registry,
                "tapwire_incomplete_messages_total",
                "Requests or responses left unpaired at close",
            ),
            dropped_segments: counter(
                &registry,
                "tapwire_dropped_segments_total",
                "Segments not delivered to an exited reader",
            ),
            outbound_links: counter(
                &registry,
                "tapwire_outbound_links_total",
                "Outbound links reported",
            ),
            active_streams: gauge(&registry, "tapwire_active_streams", "Connections being parsed"),
            queued_chunks: gauge(
                &registry,
                "tapwire_queued_chunks",
                "Chunks waiting in reader queues",
            ),
            entry_latency,
            registry,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
