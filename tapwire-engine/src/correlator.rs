//! Positional request/response pairing for one connection.
//!
//! Both readers of a connection share one correlator. Each side is a FIFO;
//! the n-th request pairs with the n-th final response no matter which
//! direction delivered first.

use std::collections::VecDeque;

use tapwire_core::{Entry, FlowId};
use tapwire_protocols::{HttpMessage, Role};
use tracing::trace;

/// Messages left without a partner when the connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpaired {
    pub requests: usize,
    pub responses: usize,
}

#[derive(Debug)]
pub struct Correlator {
    flow: FlowId,
    is_outgoing: bool,
    requests: VecDeque<HttpMessage>,
    responses: VecDeque<HttpMessage>,
    client_done: bool,
    server_done: bool,
    paired: u64,
}

impl Correlator {
    /// `flow` must be oriented client to server.
    pub fn new(flow: FlowId, is_outgoing: bool) -> Self {
        Self {
            flow,
            is_outgoing,
            requests: VecDeque::new(),
            responses: VecDeque::new(),
            client_done: false,
            server_done: false,
            paired: 0,
        }
    }

    /// Queues `message` and returns the entry it completes, if any.
    pub fn offer(&mut self, message: HttpMessage) -> Option<Entry> {
        match message.role {
            Role::Client => self.requests.push_back(message),
            Role::Server if message.is_interim() => {
                trace!(flow = %self.flow, status = ?message.status(), "skipping interim response");
                return None;
            }
            Role::Server => self.responses.push_back(message),
        }

        if self.requests.is_empty() || self.responses.is_empty() {
            return None;
        }
        let request = self.requests.pop_front()?;
        let response = self.responses.pop_front()?;
        self.paired += 1;
        Some(Entry::new(self.flow, request, response, self.is_outgoing))
    }

    /// Marks one side as finished. Once both are, returns whatever is still
    /// queued and discards it.
    pub fn finish(&mut self, role: Role) -> Option<Unpaired> {
        let already_done = self.client_done && self.server_done;
        match role {
            Role::Client => self.client_done = true,
            Role::Server => self.server_done = true,
        }
        if already_done || !(self.client_done && self.server_done) {
            return None;
        }

        let unpaired = Unpaired {
            requests: self.requests.len(),
            responses: self.responses.len(),
        };
        self.requests.clear();
        self.responses.clear();
        Some(unpaired)
    }

    pub fn paired(&self) -> u64 {
        self.paired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use tapwire_protocols::StartLine;

    fn flow() -> FlowId {
        FlowId::new(
            "10.0.0.2:51000".parse().unwrap(),
            "10.0.0.9:80".parse().unwrap(),
        )
    }

    fn request(target: &str) -> HttpMessage {
        HttpMessage {
            role: Role::Client,
            start_line: StartLine::Request {
                method: "GET".into(),
                target: target.into(),
                version: "HTTP/1.1".into(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
            byte_size: 0,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    fn response(status: u16) -> HttpMessage {
        HttpMessage {
            role: Role::Server,
            start_line: StartLine::Response {
                version: "HTTP/1.1".into(),
                status,
                reason: String::new(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
            byte_size: 0,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn pipelined_requests_pair_in_order() {
        let mut correlator = Correlator::new(flow(), false);
        assert!(correlator.offer(request("/r1")).is_none());
        assert!(correlator.offer(request("/r2")).is_none());

        let first = correlator.offer(response(201)).unwrap();
        let second = correlator.offer(response(202)).unwrap();
        assert_eq!(first.request.target(), Some("/r1"));
        assert_eq!(first.response.status(), Some(201));
        assert_eq!(second.request.target(), Some("/r2"));
        assert_eq!(second.response.status(), Some(202));
        assert_eq!(correlator.paired(), 2);
    }

    #[test]
    fn response_observed_first_still_pairs() {
        let mut correlator = Correlator::new(flow(), true);
        assert!(correlator.offer(response(200)).is_none());
        let entry = correlator.offer(request("/late")).unwrap();
        assert!(entry.is_outgoing);
        assert_eq!(entry.flow, flow());
    }

    #[test]
    fn interim_responses_are_not_paired() {
        let mut correlator = Correlator::new(flow(), false);
        correlator.offer(request("/upload"));
        assert!(correlator.offer(response(100)).is_none());
        let entry = correlator.offer(response(200)).unwrap();
        assert_eq!(entry.response.status(), Some(200));
    }

    #[test]
    fn unpaired_messages_are_counted_once_both_sides_finish() {
        let mut correlator = Correlator::new(flow(), false);
        correlator.offer(request("/a"));
        correlator.offer(response(200));
        correlator.offer(request("/dangling"));

        assert_eq!(correlator.finish(Role::Client), None);
        assert_eq!(
            correlator.finish(Role::Server),
            Some(Unpaired {
                requests: 1,
                responses: 0
            })
        );
        assert_eq!(correlator.finish(Role::Server), None);
    }
}
