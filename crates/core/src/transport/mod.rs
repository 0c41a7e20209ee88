//! RAT transport: the congestion controller and what it talks through.
//!
//! - [`rat`]: the per-flow controller state machine.
//! - [`Packet`]: the fixed 20-byte header exchanged with the peer.
//! - [`PacketSink`]: where authorized packets are handed for transmission.
//! - [`socket_opt`]: installing the algorithm as the OS congestion control.

use std::io;

mod packet;
pub mod rat;
mod sink;
pub mod socket_opt;

pub use packet::{Packet, WireError, PACKET_SIZE};
pub use sink::{recv_packet, PacketSink};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed packet: {0}")]
    Wire(#[from] WireError),
}
