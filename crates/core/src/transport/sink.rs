//! Handing authorized packets to the network, and reading them back.

use std::future::Future;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::simulation::TimeSource;

use super::{Packet, TransportError, PACKET_SIZE};

/// Destination for packets the controller authorized.
///
/// A packet dropped further down the path is not an error; only a failure to
/// hand the packet over is.
pub trait PacketSink: Send + Sync + 'static {
    fn send_packet(&self, packet: &Packet) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A connected UDP socket.
impl PacketSink for UdpSocket {
    async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        self.send(&packet.encode()).await?;
        Ok(())
    }
}

impl<S: PacketSink> PacketSink for Arc<S> {
    fn send_packet(&self, packet: &Packet) -> impl Future<Output = Result<(), TransportError>> + Send {
        S::send_packet(self, packet)
    }
}

/// Reads one datagram from a connected socket and decodes it, stamping the
/// receipt time from `clock`.
pub async fn recv_packet<T: TimeSource>(
    socket: &UdpSocket,
    clock: &T,
) -> Result<Packet, TransportError> {
    // one spare byte so oversized datagrams surface as trailing bytes
    let mut buf = [0u8; PACKET_SIZE + 1];
    let len = socket.recv(&mut buf).await?;
    Ok(Packet::decode_received(&buf[..len], clock)?)
}
