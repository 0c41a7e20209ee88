//! RAT controller statistics snapshot.

use std::time::Duration;

use crate::memory::Memory;

/// Point-in-time view of a controller, taken under its lock.
#[derive(Debug, Clone)]
pub struct RatStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Current congestion window (packets).
    pub congestion_window: u32,
    /// Minimum spacing between sends under the current whisker.
    pub intersend: Duration,
    /// Flow id the next packet will carry.
    pub flow_id: u32,
    /// Generation of the whisker in force, if one was adopted yet.
    pub generation: Option<u32>,
    pub memory: Memory,
    pub min_rtt: Option<Duration>,
}

impl RatStats {
    /// Packets sent and not yet accounted for by an ack or loss.
    pub fn in_flight(&self) -> u64 {
        self.packets_sent.saturating_sub(self.packets_received)
    }
}
