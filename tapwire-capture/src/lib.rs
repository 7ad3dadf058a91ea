//! tapwire-capture
//!
//! Packet acquisition and TCP reassembly. Sources decode frames into
//! [`TcpSegment`]s; the [`Assembler`] turns those into ordered per-direction
//! byte streams delivered to a [`ConnectionHandler`].

pub mod assembler;
pub mod error;
pub mod packet;
pub mod source;

pub use assembler::{Assembler, AssemblerStats, CloseReason, ConnectionHandler, Direction};
pub use error::{CaptureError, DecodeError};
pub use packet::{decode, LinkType, TcpFlags, TcpSegment};
pub use source::{interface_addresses, PacketSource, SourceEvent, SourceStats};
