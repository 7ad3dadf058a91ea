//! Boundaries finished work is handed to.
//!
//! Sinks are shared by every connection's reader tasks, so implementations
//! must tolerate concurrent callers. Delivery order across connections is
//! unspecified.

use parking_lot::Mutex;

use crate::entry::Entry;
use crate::outbound::OutboundLink;

/// Receives each correlated request/response pair exactly once.
pub trait EntrySink: Send + Sync {
    fn accept(&self, entry: Entry);
}

/// Receives each qualifying outbound link once, at connection open.
pub trait LinkSink: Send + Sync {
    fn accept(&self, link: OutboundLink);
}

/// In-memory sink for both entries and links.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<Entry>>,
    links: Mutex<Vec<OutboundLink>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    pub fn links(&self) -> Vec<OutboundLink> {
        self.links.lock().clone()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl EntrySink for CollectingSink {
    fn accept(&self, entry: Entry) {
        self.entries.lock().push(entry);
    }
}

impl LinkSink for CollectingSink {
    fn accept(&self, link: OutboundLink) {
        self.links.lock().push(link);
    }
}
