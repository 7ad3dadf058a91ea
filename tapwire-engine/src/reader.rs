//! One protocol reader per connection direction.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tapwire_core::FlowId;
use tapwire_protocols::{HttpMessage, HttpParseError, HttpStreamParser, Role};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, instrument, trace};

use crate::context::EngineContext;
use crate::correlator::Correlator;
use crate::fault::Fault;
use crate::tracker::ReaderGuard;

/// Ordered bytes of one direction, as delivered by reassembly.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    pub observed_at: DateTime<Utc>,
}

pub(crate) struct Reader {
    pub flow: FlowId,
    pub role: Role,
    pub queue: UnboundedReceiver<Chunk>,
    pub correlator: Arc<Mutex<Correlator>>,
    pub context: Arc<EngineContext>,
    pub guard: ReaderGuard,
}

impl Reader {
    /// Parses until the queue closes or the bytes turn out malformed.
    #[instrument(skip_all, fields(flow = %self.flow, role = self.role.as_str()))]
    pub async fn run(mut self) {
        let mut parser =
            HttpStreamParser::with_limit(self.role, self.context.settings.max_message_bytes);

        while let Some(chunk) = self.queue.recv().await {
            self.context.metrics.queued_chunks.dec();
            parser.feed(&chunk.data, chunk.observed_at);

            loop {
                match parser.next_message() {
                    Ok(Some(message)) => self.deliver(message),
                    Ok(None) => break,
                    Err(error) => {
                        self.abort(error);
                        return;
                    }
                }
            }
        }

        if let Some(message) = parser.finish() {
            self.deliver(message);
        }
        if parser.buffered() > 0 {
            trace!(bytes = parser.buffered(), "discarding incomplete trailing message");
        }
        self.finish();
    }

    fn deliver(&self, message: HttpMessage) {
        trace!(byte_size = message.byte_size, "message delineated");
        // Emitting under the lock keeps the sink in pairing order.
        let mut correlator = self.correlator.lock();
        if let Some(entry) = correlator.offer(message) {
            self.context.emit(entry);
        }
    }

    fn abort(mut self, error: HttpParseError) {
        debug!(%error, "abandoning direction");
        let fault = match error {
            HttpParseError::MessageTooLarge { limit } => Fault::MessageTooLarge {
                flow: self.flow,
                role: self.role,
                limit,
            },
            error => Fault::ParseFailure {
                flow: self.flow,
                role: self.role,
                error,
            },
        };
        self.context.report(fault);

        // Chunks still queued will never be read.
        self.queue.close();
        while self.queue.try_recv().is_ok() {
            self.context.metrics.queued_chunks.dec();
        }
        self.finish();
    }

    fn finish(self) {
        let unpaired = self.correlator.lock().finish(self.role);
        if let Some(unpaired) = unpaired.filter(|u| u.requests + u.responses > 0) {
            self.context.report(Fault::IncompleteExchange {
                flow: self.flow,
                requests: unpaired.requests,
                responses: unpaired.responses,
            });
        }
        drop(self.guard);
    }
}
