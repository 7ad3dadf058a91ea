//! Per-connection lifecycle.
//!
//! ```text
//! Pending --(filter: no target, DNS, missing handshake)--> Ignored
//!    \--(filter: target)--> Active --(close)--> Closed
//! ```
//!
//! An Active stream owns the sending half of each reader's queue. Closing the
//! stream drops both senders, which is the readers' only cancellation signal.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tapwire_capture::{CloseReason, Direction};
use tapwire_core::FlowId;
use tapwire_protocols::Role;
use tapwire_telemetry::EventLogger;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, trace};

use crate::context::EngineContext;
use crate::correlator::Correlator;
use crate::fault::Fault;
use crate::reader::{Chunk, Reader};
use crate::tracker::ReaderTracker;

/// DNS traffic is tracked but never parsed as HTTP.
pub const DNS_PORT: u16 = 53;
const HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotTarget,
    Dns,
    MissingHandshake,
    ParsingDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Pending,
    Ignored(IgnoreReason),
    Active,
    Closed,
}

struct Outlet {
    queue: UnboundedSender<Chunk>,
    dropped: bool,
}

enum State {
    Pending,
    Ignored(IgnoreReason),
    Active { client: Outlet, server: Outlet },
    Closed,
}

pub struct StreamManager {
    /// Oriented client to server.
    flow: FlowId,
    is_target: bool,
    is_outgoing: bool,
    is_dns: bool,
    /// First seen from the server side, so forward bytes are responses.
    reversed: bool,
    state: State,
}

impl StreamManager {
    /// Evaluates a newly seen connection and spawns its readers if it is a
    /// capture target.
    pub fn open(
        observed: FlowId,
        handshake_seen: bool,
        context: &Arc<EngineContext>,
        tracker: &Arc<ReaderTracker>,
        runtime: &Handle,
    ) -> Self {
        let reversed = observed.src_port == HTTP_PORT && observed.dst_port != HTTP_PORT;
        let flow = if reversed { observed.reverse() } else { observed };
        let props = context.filter.decide(flow.src_ip, flow.dst_ip, flow.dst_port);

        if let Some(link) = context.detector.detect(&flow) {
            context.emit_link(link);
        }

        let mut stream = Self {
            flow,
            is_target: props.is_target,
            is_outgoing: props.is_outgoing,
            is_dns: flow.involves_port(DNS_PORT),
            reversed,
            state: State::Pending,
        };
        stream.activate(handshake_seen, context, tracker, runtime);
        stream
    }

    fn activate(
        &mut self,
        handshake_seen: bool,
        context: &Arc<EngineContext>,
        tracker: &Arc<ReaderTracker>,
        runtime: &Handle,
    ) {
        let ignore = if !self.is_target {
            Some(IgnoreReason::NotTarget)
        } else if self.is_dns {
            Some(IgnoreReason::Dns)
        } else if !context.settings.parse_http {
            Some(IgnoreReason::ParsingDisabled)
        } else if !handshake_seen && !context.settings.allow_missing_init {
            Some(IgnoreReason::MissingHandshake)
        } else {
            None
        };

        if let Some(reason) = ignore {
            trace!(flow = %self.flow, ?reason, "stream ignored");
            context.metrics.streams_ignored.inc();
            self.state = State::Ignored(reason);
            return;
        }

        let correlator = Arc::new(Mutex::new(Correlator::new(self.flow, self.is_outgoing)));
        let client = self.spawn_reader(Role::Client, &correlator, context, tracker, runtime);
        let server = self.spawn_reader(Role::Server, &correlator, context, tracker, runtime);
        self.state = State::Active { client, server };

        context.metrics.streams_opened.inc();
        context.metrics.active_streams.inc();
        EventLogger::log_event(
            "stream_opened",
            vec![
                KeyValue::new("flow", self.flow.to_string()),
                KeyValue::new("outgoing", self.is_outgoing),
                KeyValue::new("reversed", self.reversed),
                KeyValue::new("handshake", handshake_seen),
            ],
        );
    }

    fn spawn_reader(
        &self,
        role: Role,
        correlator: &Arc<Mutex<Correlator>>,
        context: &Arc<EngineContext>,
        tracker: &Arc<ReaderTracker>,
        runtime: &Handle,
    ) -> Outlet {
        let (queue, receiver) = mpsc::unbounded_channel();
        let reader = Reader {
            flow: self.flow,
            role,
            queue: receiver,
            correlator: Arc::clone(correlator),
            context: Arc::clone(context),
            guard: tracker.register(),
        };
        runtime.spawn(reader.run());
        Outlet {
            queue,
            dropped: false,
        }
    }

    pub fn flow(&self) -> &FlowId {
        &self.flow
    }

    pub fn is_outgoing(&self) -> bool {
        self.is_outgoing
    }

    pub fn is_dns(&self) -> bool {
        self.is_dns
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn status(&self) -> StreamStatus {
        match &self.state {
            State::Pending => StreamStatus::Pending,
            State::Ignored(reason) => StreamStatus::Ignored(*reason),
            State::Active { .. } => StreamStatus::Active,
            State::Closed => StreamStatus::Closed,
        }
    }

    /// Role of the bytes travelling in `direction` of the observed flow.
    pub fn role_of(&self, direction: Direction) -> Role {
        match (direction, self.reversed) {
            (Direction::Forward, false) | (Direction::Reverse, true) => Role::Client,
            _ => Role::Server,
        }
    }

    /// Enqueues ordered bytes for the reader of `direction`. Never blocks.
    pub fn deliver(
        &mut self,
        direction: Direction,
        data: Bytes,
        observed_at: DateTime<Utc>,
        context: &EngineContext,
    ) {
        let role = self.role_of(direction);
        let State::Active { client, server } = &mut self.state else {
            return;
        };
        let outlet = match role {
            Role::Client => client,
            Role::Server => server,
        };

        if context.settings.hexdump {
            trace!(flow = %self.flow, role = role.as_str(), hexdump = %hex::encode(&data), "segment");
        }

        if outlet.dropped {
            context.metrics.dropped_segments.inc();
            return;
        }
        match outlet.queue.send(Chunk { data, observed_at }) {
            Ok(()) => context.metrics.queued_chunks.inc(),
            Err(_) => {
                outlet.dropped = true;
                context.metrics.dropped_segments.inc();
                context.report(Fault::DeliveryDropped {
                    flow: self.flow,
                    role,
                });
            }
        }
    }

    /// Closes both reader queues. Readers drain what is queued and exit.
    pub fn close(&mut self, reason: CloseReason, context: &EngineContext) {
        let previous = std::mem::replace(&mut self.state, State::Closed);
        if let State::Active { .. } = previous {
            context.metrics.active_streams.dec();
            EventLogger::log_event(
                "stream_closed",
                vec![
                    KeyValue::new("flow", self.flow.to_string()),
                    KeyValue::new("reason", reason.as_str()),
                ],
            );
        }
        debug!(flow = %self.flow, reason = reason.as_str(), "stream closed");
    }
}
