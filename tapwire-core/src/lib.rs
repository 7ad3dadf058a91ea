//! # tapwire-core
//!
//! Foundation layer shared by the capture engine and its collaborators:
//! - `flow`: connection identity
//! - `filter`: capture-target selection
//! - `outbound`: dependency-edge detection
//! - `entry`: correlated request/response records
//! - `sink`: boundaries the engine hands finished work to
//! - `masking` / `resolver`: entry post-processing before it reaches a sink

pub mod entry;
pub mod error;
pub mod filter;
pub mod flow;
pub mod masking;
pub mod outbound;
pub mod resolver;
pub mod sink;

pub mod prelude {
    pub use crate::entry::*;
    pub use crate::error::*;
    pub use crate::filter::*;
    pub use crate::flow::*;
    pub use crate::outbound::*;
    pub use crate::sink::*;
}

pub use entry::{Entry, EntrySummary};
pub use error::FilterError;
pub use filter::{Authority, CaptureDirection, CaptureMode, FilterSettings, FlowFilter, StreamProps};
pub use flow::FlowId;
pub use masking::BodyMasker;
pub use outbound::{OutboundLink, OutboundLinkDetector};
pub use resolver::{NameResolver, StaticResolver};
pub use sink::{CollectingSink, EntrySink, LinkSink};
