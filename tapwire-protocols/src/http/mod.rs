//! ## tapwire-protocols::http
//! **Incremental HTTP/1.x message delineation**
//!
//! A [`HttpStreamParser`] consumes the ordered bytes of one direction of a TCP
//! connection and yields complete messages one at a time:
//! - start line and headers are parsed with `httparse`, preserving order and
//!   duplicate names
//! - a declared `Content-Length` takes precedence over chunked framing
//! - chunked bodies are decoded into a single logical body
//! - responses without framing are delimited by connection close
//!
//! Pipelined messages are handled by resetting after every message.

mod chunked;
mod message;
mod parser;

pub use chunked::ChunkedDecoder;
pub use message::{Header, HttpMessage, Role, StartLine};
pub use parser::{HttpParseError, HttpStreamParser, DEFAULT_MAX_MESSAGE_BYTES};
