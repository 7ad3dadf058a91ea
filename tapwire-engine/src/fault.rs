//! Non-fatal fault reporting.
//!
//! A fault always stays local to one connection (often one direction of it).
//! The engine keeps running; reporters only make faults observable.

use opentelemetry::KeyValue;
use tapwire_core::FlowId;
use tapwire_protocols::{HttpParseError, Role};
use tapwire_telemetry::{EventLogger, MetricsRecorder};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Malformed bytes; the direction is no longer parsed.
    ParseFailure {
        flow: FlowId,
        role: Role,
        error: HttpParseError,
    },
    /// A segment arrived after its reader had exited.
    DeliveryDropped { flow: FlowId, role: Role },
    /// The connection ended with messages that never found a partner.
    IncompleteExchange {
        flow: FlowId,
        requests: usize,
        responses: usize,
    },
    /// A message outgrew the accumulation limit.
    MessageTooLarge { flow: FlowId, role: Role, limit: usize },
}

impl Fault {
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::ParseFailure { .. } => "parse_failure",
            Fault::DeliveryDropped { .. } => "delivery_dropped",
            Fault::IncompleteExchange { .. } => "incomplete_exchange",
            Fault::MessageTooLarge { .. } => "message_too_large",
        }
    }

    pub fn flow(&self) -> &FlowId {
        match self {
            Fault::ParseFailure { flow, .. }
            | Fault::DeliveryDropped { flow, .. }
            | Fault::IncompleteExchange { flow, .. }
            | Fault::MessageTooLarge { flow, .. } => flow,
        }
    }

    fn attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![KeyValue::new("flow", self.flow().to_string())];
        match self {
            Fault::ParseFailure { role, error, .. } => {
                attributes.push(KeyValue::new("role", role.as_str()));
                attributes.push(KeyValue::new("error", error.to_string()));
            }
            Fault::DeliveryDropped { role, .. } => {
                attributes.push(KeyValue::new("role", role.as_str()));
            }
            Fault::IncompleteExchange {
                requests,
                responses,
                ..
            } => {
                attributes.push(KeyValue::new("unpaired_requests", *requests as i64));
                attributes.push(KeyValue::new("unpaired_responses", *responses as i64));
            }
            Fault::MessageTooLarge { role, limit, .. } => {
                attributes.push(KeyValue::new("role", role.as_str()));
                attributes.push(KeyValue::new("limit", *limit as i64));
            }
        }
        attributes
    }
}

pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: &Fault);
}

/// Counts faults in metrics and emits them as structured events.
#[derive(Debug, Clone)]
pub struct TelemetryFaultReporter {
    metrics: MetricsRecorder,
}

impl TelemetryFaultReporter {
    pub fn new(metrics: MetricsRecorder) -> Self {
        Self { metrics }
    }
}

impl FaultReporter for TelemetryFaultReporter {
    fn report(&self, fault: &Fault) {
        match fault {
            Fault::ParseFailure { .. } | Fault::MessageTooLarge { .. } => {
                self.metrics.parse_failures.inc()
            }
            Fault::DeliveryDropped { flow, role } => {
                warn!(%flow, role = role.as_str(), "reader gone, dropping segments");
            }
            Fault::IncompleteExchange {
                requests,
                responses,
                ..
            } => self
                .metrics
                .incomplete_messages
                .inc_by((requests + responses) as u64),
        }
        EventLogger::log_event(fault.kind(), fault.attributes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn flow() -> FlowId {
        FlowId::new(
            "10.0.0.2:51000".parse().unwrap(),
            "10.0.0.9:80".parse().unwrap(),
        )
    }

    #[test]
    #[traced_test]
    fn telemetry_reporter_counts_and_logs() {
        let metrics = MetricsRecorder::new();
        let reporter = TelemetryFaultReporter::new(metrics.clone());

        reporter.report(&Fault::ParseFailure {
            flow: flow(),
            role: Role::Client,
            error: HttpParseError::InvalidStartLine("bogus".into()),
        });
        reporter.report(&Fault::IncompleteExchange {
            flow: flow(),
            requests: 2,
            responses: 0,
        });

        assert_eq!(metrics.parse_failures.get(), 1);
        assert_eq!(metrics.incomplete_messages.get(), 2);
        assert!(logs_contain("parse_failure"));
        assert!(logs_contain("unpaired_requests=2"));
    }
}
