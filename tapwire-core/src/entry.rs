//! Correlated request/response records.

use serde::Serialize;
use tapwire_protocols::HttpMessage;
use uuid::Uuid;

use crate::flow::FlowId;

/// One request paired with its response, the unit handed to an entry sink.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: Uuid,
    pub flow: FlowId,
    pub request: HttpMessage,
    pub response: HttpMessage,
    pub source_label: Option<String>,
    pub destination_label: Option<String>,
    pub is_outgoing: bool,
}

impl Entry {
    pub fn new(flow: FlowId, request: HttpMessage, response: HttpMessage, is_outgoing: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow,
            request,
            response,
            source_label: None,
            destination_label: None,
            is_outgoing,
        }
    }

    /// Milliseconds from the first request byte to the last response byte.
    /// Clamped at zero since the two directions are timestamped independently.
    pub fn elapsed_ms(&self) -> i64 {
        (self.response.completed_at - self.request.started_at)
            .num_milliseconds()
            .max(0)
    }

    /// `Host` header when present, destination address otherwise.
    pub fn service(&self) -> String {
        match self.request.header("host") {
            Some(host) => host.trim().to_string(),
            None => self.flow.dst().to_string(),
        }
    }

    pub fn summary(&self) -> EntrySummary {
        let target = self.request.target().unwrap_or("/");
        let service = self.service();
        let path = target.split(['?', '#']).next().unwrap_or(target).to_string();
        let url = if target.starts_with('/') {
            format!("http://{service}{target}")
        } else {
            // absolute-form target, as sent to proxies
            target.to_string()
        };

        EntrySummary {
            id: self.id,
            url,
            path,
            method: self.request.method().unwrap_or_default().to_string(),
            status: self.response.status().unwrap_or_default(),
            service,
            request_sender_ip: self.flow.src_ip.to_string(),
            timestamp_ms: self.request.started_at.timestamp_millis(),
            elapsed_ms: self.elapsed_ms(),
            is_outgoing: self.is_outgoing,
        }
    }
}

/// Flat listing view of an [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub id: Uuid,
    pub url: String,
    pub path: String,
    pub method: String,
    pub status: u16,
    pub service: String,
    pub request_sender_ip: String,
    pub timestamp_ms: i64,
    pub elapsed_ms: i64,
    pub is_outgoing: bool,
}
