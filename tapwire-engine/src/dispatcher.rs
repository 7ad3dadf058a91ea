use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tapwire_capture::{CloseReason, ConnectionHandler, Direction};
use tapwire_core::FlowId;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::stream::{StreamManager, StreamStatus};
use crate::tracker::ReaderTracker;

/// Routes reassembled connection events to their [`StreamManager`].
///
/// Lives on the capture thread. Reader tasks are spawned onto `runtime` and
/// counted by the shared [`ReaderTracker`].
pub struct Dispatcher {
    context: Arc<EngineContext>,
    streams: HashMap<FlowId, StreamManager>,
    tracker: Arc<ReaderTracker>,
    runtime: Handle,
}

impl Dispatcher {
    pub fn new(context: Arc<EngineContext>, runtime: Handle) -> Self {
        Self {
            context,
            streams: HashMap::new(),
            tracker: ReaderTracker::new(),
            runtime,
        }
    }

    pub fn tracker(&self) -> Arc<ReaderTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn status(&self, flow: &FlowId) -> Option<StreamStatus> {
        self.streams.get(flow).map(StreamManager::status)
    }

    /// Closes every stream. Readers keep draining in the background.
    pub fn close_all(&mut self) {
        for (_, mut stream) in self.streams.drain() {
            stream.close(CloseReason::Shutdown, &self.context);
        }
    }

    /// Closes every stream and resolves once every reader has exited.
    pub async fn shutdown(mut self) {
        self.close_all();
        let pending = self.tracker.active();
        if pending > 0 {
            info!(readers = pending, "waiting for readers to drain");
        }
        self.tracker.wait().await;
    }
}

impl ConnectionHandler for Dispatcher {
    fn on_open(&mut self, flow: FlowId, handshake_seen: bool) {
        let stream = StreamManager::open(
            flow,
            handshake_seen,
            &self.context,
            &self.tracker,
            &self.runtime,
        );
        if let Some(mut stale) = self.streams.insert(flow, stream) {
            warn!(%flow, "connection reopened before close");
            stale.close(CloseReason::Shutdown, &self.context);
        }
    }

    fn on_data(&mut self, flow: &FlowId, direction: Direction, data: Bytes, observed_at: DateTime<Utc>) {
        if let Some(stream) = self.streams.get_mut(flow) {
            stream.deliver(direction, data, observed_at, &self.context);
        }
    }

    fn on_close(&mut self, flow: &FlowId, reason: CloseReason) {
        if let Some(mut stream) = self.streams.remove(flow) {
            stream.close(reason, &self.context);
        }
    }
}
