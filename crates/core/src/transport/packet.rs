//! Fixed-layout RAT packet header.
//!
//! ```text
//!  0       4       8       12              20
//!  +-------+-------+-------+---------------+
//!  |seq_no |sender |flow_id|   sent_at     |
//!  | i32   | i32   | u32   |   i64 (ns)    |
//!  +-------+-------+-------+---------------+
//! ```
//!
//! All fields are big-endian. `received_at` is local-only and never encoded.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::simulation::TimeSource;

/// Size of an encoded packet on the wire.
pub const PACKET_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated packet: `{field}` needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Packet {
    pub seq_no: i32,
    pub sender_id: i32,
    pub flow_id: u32,
    /// Send timestamp, nanoseconds since the UNIX epoch.
    pub sent_at: i64,
    /// Local receipt timestamp in the same unit; `None` until received.
    pub received_at: Option<i64>,
}

const FIELDS: [(&str, usize); 4] = [("seq_no", 4), ("sender_id", 4), ("flow_id", 4), ("sent_at", 8)];

impl Packet {
    pub fn new(seq_no: i32, sender_id: i32, flow_id: u32, sent_at: i64) -> Self {
        Self {
            seq_no,
            sender_id,
            flow_id,
            sent_at,
            received_at: None,
        }
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        BigEndian::write_i32(&mut buf[0..4], self.seq_no);
        BigEndian::write_i32(&mut buf[4..8], self.sender_id);
        BigEndian::write_u32(&mut buf[8..12], self.flow_id);
        BigEndian::write_i64(&mut buf[12..20], self.sent_at);
        buf
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.encode())
    }

    /// Decodes a header. The result carries no receipt stamp.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut offset = 0;
        for (field, width) in FIELDS {
            if buf.len() < offset + width {
                return Err(WireError::Truncated {
                    field,
                    needed: width,
                    available: buf.len().saturating_sub(offset),
                });
            }
            offset += width;
        }
        if buf.len() > PACKET_SIZE {
            return Err(WireError::TrailingBytes(buf.len() - PACKET_SIZE));
        }
        Ok(Self::new(
            BigEndian::read_i32(&buf[0..4]),
            BigEndian::read_i32(&buf[4..8]),
            BigEndian::read_u32(&buf[8..12]),
            BigEndian::read_i64(&buf[12..20]),
        ))
    }

    /// Decodes a header and stamps `received_at` from `clock` once the read
    /// is complete.
    pub fn decode_received<T: TimeSource>(buf: &[u8], clock: &T) -> Result<Self, WireError> {
        let mut packet = Self::decode(buf)?;
        packet.received_at = Some(clock.now_nanos() as i64);
        Ok(packet)
    }

    /// Round-trip time implied by the two stamps, if received.
    pub fn rtt_nanos(&self) -> Option<i64> {
        self.received_at.map(|received| received.saturating_sub(self.sent_at).max(0))
    }
}
