//! # tapwire-engine
//!
//! Stream lifecycle, per-direction HTTP readers, request/response
//! correlation and shutdown coordination.
//!
//! Data flow:
//!
//! ```text
//! PacketSource -> Assembler -> Dispatcher -> StreamManager -> Reader x2 -> Correlator -> EntrySink
//!                                  \-> OutboundLinkDetector -> LinkSink
//! ```

pub mod context;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod fault;
mod reader;
pub mod runtime;
pub mod stream;
pub mod tracker;

pub use context::{EngineContext, StreamSettings};
pub use correlator::{Correlator, Unpaired};
pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use fault::{Fault, FaultReporter, TelemetryFaultReporter};
pub use reader::Chunk;
pub use runtime::{CaptureRuntime, RunSummary};
pub use stream::{IgnoreReason, StreamManager, StreamStatus};
pub use tracker::{ReaderGuard, ReaderTracker};
