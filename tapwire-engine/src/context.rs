//! Immutable collaborators shared by every stream of an engine.

use std::sync::Arc;

use tapwire_config::TapwireConfig;
use tapwire_core::{
    BodyMasker, Entry, EntrySink, FlowFilter, LinkSink, NameResolver, OutboundLink,
    OutboundLinkDetector,
};
use tapwire_telemetry::MetricsRecorder;
use tracing::debug;

use crate::error::EngineError;
use crate::fault::{Fault, FaultReporter, TelemetryFaultReporter};

/// Per-stream knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub parse_http: bool,
    pub allow_missing_init: bool,
    pub max_message_bytes: usize,
    pub hexdump: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            parse_http: true,
            allow_missing_init: true,
            max_message_bytes: tapwire_protocols::http::DEFAULT_MAX_MESSAGE_BYTES,
            hexdump: false,
        }
    }
}

pub struct EngineContext {
    pub filter: FlowFilter,
    pub detector: OutboundLinkDetector,
    pub settings: StreamSettings,
    pub metrics: MetricsRecorder,
    masker: BodyMasker,
    resolver: Arc<dyn NameResolver>,
    entries: Arc<dyn EntrySink>,
    links: Arc<dyn LinkSink>,
    faults: Arc<dyn FaultReporter>,
}

impl EngineContext {
    pub fn new(
        filter: FlowFilter,
        detector: OutboundLinkDetector,
        entries: Arc<dyn EntrySink>,
        links: Arc<dyn LinkSink>,
    ) -> Self {
        let metrics = MetricsRecorder::new();
        Self {
            filter,
            detector,
            settings: StreamSettings::default(),
            faults: Arc::new(TelemetryFaultReporter::new(metrics.clone())),
            metrics,
            masker: BodyMasker::default(),
            resolver: Arc::new(tapwire_core::StaticResolver::default()),
            entries,
            links,
        }
    }

    /// Builds a context from validated configuration.
    pub fn from_config(
        config: &TapwireConfig,
        entries: Arc<dyn EntrySink>,
        links: Arc<dyn LinkSink>,
    ) -> Result<Self, EngineError> {
        let filter = FlowFilter::new(config.filter.to_settings()?);
        let detector = config.filter.outbound_detector();
        Ok(Self::new(filter, detector, entries, links)
            .with_settings(StreamSettings {
                parse_http: config.engine.parse_http,
                allow_missing_init: config.assembly.allow_missing_init,
                max_message_bytes: config.engine.max_message_bytes,
                hexdump: config.engine.hexdump,
            })
            .with_masker(config.engine.masker()?)
            .with_resolver(Arc::new(config.engine.resolver())))
    }

    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_masker(mut self, masker: BodyMasker) -> Self {
        self.masker = masker;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_fault_reporter(mut self, faults: Arc<dyn FaultReporter>) -> Self {
        self.faults = faults;
        self
    }

    /// Replaces the metrics and rebinds the default fault reporter to them.
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.faults = Arc::new(TelemetryFaultReporter::new(metrics.clone()));
        self.metrics = metrics;
        self
    }

    /// Post-processes a correlated entry and hands it to the sink.
    pub fn emit(&self, mut entry: Entry) {
        self.masker.mask_entry(&mut entry);
        self.resolver.label(&mut entry);

        let elapsed_ms = entry.elapsed_ms();
        self.metrics.entries.inc();
        self.metrics.entry_latency.observe(elapsed_ms as f64);
        debug!(
            flow = %entry.flow,
            method = entry.request.method().unwrap_or_default(),
            status = entry.response.status().unwrap_or_default(),
            elapsed_ms,
            "entry"
        );
        self.entries.accept(entry);
    }

    pub fn emit_link(&self, link: OutboundLink) {
        self.metrics.outbound_links.inc();
        debug!(src = %link.src_ip, dst = %link.dst_ip, port = link.dst_port, "outbound link");
        self.links.accept(link);
    }

    pub fn report(&self, fault: Fault) {
        self.faults.report(&fault);
    }
}
