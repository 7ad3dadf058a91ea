//! # Tapwire Protocol Parsers
//!
//! Crate for delineating application-layer messages carried on reassembled
//! TCP byte streams. Only HTTP/1.x framing is supported.

pub mod http;

pub use http::{Header, HttpMessage, HttpParseError, HttpStreamParser, Role, StartLine};
