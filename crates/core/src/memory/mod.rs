//! Network-state tracking ("memory") for the RAT sender.
//!
//! A [`Memory`] condenses the recent send/receive timing of one flow into four
//! smoothed signals. Those four values are the coordinates used to look up a
//! control rule in a [`WhiskerTree`](crate::whisker::WhiskerTree).
//!
//! ## Units
//!
//! Gaps and RTTs are folded in milliseconds (the tick unit trained tables
//! expect). `latest_delay` is a dimensionless `rtt / min_rtt` ratio.
//!
//! ## Update paths
//!
//! | Event | Signals touched |
//! |-------|-----------------|
//! | packet sent | `send_rate`, `recv_rate` (fast EWMA of the inter-send gap) |
//! | packets received | `recv_rate`, `send_rate` (fast), `inter_packet_delay` (slow), `min_rtt`, `latest_delay` |
//! | bare RTT sample | `min_rtt`, `latest_delay` |

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use ordered_float::OrderedFloat;

use crate::transport::Packet;

mod range;

pub use range::MemoryRange;

/// Fast smoothing factor applied to the send/receive rate signals.
pub(crate) const ALPHA: f64 = 1.0 / 8.0;

/// Slow smoothing factor applied to the inter-packet delay signal.
pub(crate) const SLOW_ALPHA: f64 = 1.0 / 256.0;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// One coordinate of the memory space, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    RecvRate,
    SendRate,
    LatestDelay,
    InterPacketDelay,
}

impl Axis {
    pub const ALL: [Axis; 4] = [
        Axis::RecvRate,
        Axis::SendRate,
        Axis::LatestDelay,
        Axis::InterPacketDelay,
    ];
}

/// Smoothed summary of a flow's recent dynamics.
///
/// Owned exclusively by one controller. The four coordinates are always
/// finite and non-negative; `min_rtt` only ever decreases once it is seeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Memory {
    recv_rate: f64,
    send_rate: f64,
    latest_delay: f64,
    inter_packet_delay: f64,
    /// Smallest RTT seen on this flow (ms). Meaningless until `rtt_seeded`.
    min_rtt: f64,
    rtt_seeded: bool,
    /// Send path tracker (ms since epoch of the last sent packet).
    last_send_event: Option<f64>,
    /// Receive path trackers (ms since epoch).
    last_tick_sent: Option<f64>,
    last_tick_received: Option<f64>,
}

impl Memory {
    /// An empty memory: every coordinate at zero, no smoothing history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bare coordinate point, used for domain bounds.
    pub fn from_coordinates(
        recv_rate: f64,
        send_rate: f64,
        latest_delay: f64,
        inter_packet_delay: f64,
    ) -> Self {
        Self {
            recv_rate,
            send_rate,
            latest_delay,
            inter_packet_delay,
            ..Self::default()
        }
    }

    /// Lowest point of the memory space (all zeros).
    pub fn min_value() -> Self {
        Self::default()
    }

    /// Highest point of the memory space.
    pub fn max_value() -> Self {
        Self::from_coordinates(f64::MAX, f64::MAX, f64::MAX, f64::MAX)
    }

    pub fn recv_rate(&self) -> f64 {
        self.recv_rate
    }

    pub fn send_rate(&self) -> f64 {
        self.send_rate
    }

    pub fn latest_delay(&self) -> f64 {
        self.latest_delay
    }

    pub fn inter_packet_delay(&self) -> f64 {
        self.inter_packet_delay
    }

    /// Minimum RTT observed so far, if any sample was taken.
    pub fn min_rtt(&self) -> Option<Duration> {
        self.rtt_seeded
            .then(|| Duration::from_nanos((self.min_rtt * NANOS_PER_MILLI).round() as u64))
    }

    pub fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::RecvRate => self.recv_rate,
            Axis::SendRate => self.send_rate,
            Axis::LatestDelay => self.latest_delay,
            Axis::InterPacketDelay => self.inter_packet_delay,
        }
    }

    /// Field-wise `>=`: true when every coordinate is at least `other`'s.
    pub fn ge_all(&self, other: &Memory) -> bool {
        Axis::ALL
            .iter()
            .all(|&axis| self.coordinate(axis) >= other.coordinate(axis))
    }

    /// Field-wise `<`: true when every coordinate is strictly below `other`'s.
    pub fn lt_all(&self, other: &Memory) -> bool {
        Axis::ALL
            .iter()
            .all(|&axis| self.coordinate(axis) < other.coordinate(axis))
    }

    /// Folds a send event into the rate signals.
    ///
    /// The first call only seeds the trackers; later calls fold the
    /// inter-send gap into both fast EWMAs.
    pub fn update_sent(&mut self, sent_at_nanos: i64) {
        let sent = nanos_to_millis(sent_at_nanos);
        match self.last_send_event {
            None => {
                self.last_send_event = Some(sent);
                if self.last_tick_sent.is_none() {
                    self.last_tick_sent = Some(sent);
                    self.last_tick_received = Some(sent);
                }
            }
            Some(previous) => {
                let gap = (sent - previous).max(0.0);
                self.send_rate = ewma(self.send_rate, gap, ALPHA);
                self.recv_rate = ewma(self.recv_rate, gap, ALPHA);
                self.last_send_event = Some(sent);
            }
        }
    }

    /// Folds a batch of acknowledged packets into the memory.
    ///
    /// Only packets of `flow_id` that carry a local receipt stamp count;
    /// everything else is ignored without side effects.
    pub fn update_received(&mut self, packets: &[Packet], flow_id: u32) {
        for packet in packets.iter().filter(|p| p.flow_id == flow_id) {
            let Some(received_at) = packet.received_at else {
                continue;
            };
            let sent = nanos_to_millis(packet.sent_at);
            let received = nanos_to_millis(received_at);
            let rtt = (received - sent).max(0.0);

            if !self.rtt_seeded {
                self.seed_rtt(rtt);
                self.last_tick_sent = Some(sent);
                self.last_tick_received = Some(received);
                continue;
            }

            let (Some(last_sent), Some(last_received)) =
                (self.last_tick_sent, self.last_tick_received)
            else {
                self.last_tick_sent = Some(sent);
                self.last_tick_received = Some(received);
                self.fold_rtt(rtt);
                continue;
            };

            let send_gap = (sent - last_sent).max(0.0);
            let receive_gap = (received - last_received).max(0.0);
            self.recv_rate = ewma(self.recv_rate, receive_gap, ALPHA);
            self.send_rate = ewma(self.send_rate, send_gap, ALPHA);
            self.inter_packet_delay = ewma(self.inter_packet_delay, receive_gap, SLOW_ALPHA);
            self.last_tick_sent = Some(sent);
            self.last_tick_received = Some(received);
            self.fold_rtt(rtt);
        }
    }

    /// Folds a bare RTT sample, leaving the rate signals untouched.
    pub fn update_rtt(&mut self, rtt: Duration) {
        let rtt = rtt.as_nanos() as f64 / NANOS_PER_MILLI;
        if self.rtt_seeded {
            self.fold_rtt(rtt);
        } else {
            self.seed_rtt(rtt);
        }
    }

    /// Discards all smoothing history, e.g. when a flow restarts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn seed_rtt(&mut self, rtt: f64) {
        self.rtt_seeded = true;
        self.min_rtt = rtt;
        self.latest_delay = delay_ratio(rtt, rtt);
    }

    fn fold_rtt(&mut self, rtt: f64) {
        self.min_rtt = self.min_rtt.min(rtt);
        self.latest_delay = delay_ratio(rtt, self.min_rtt);
    }

    fn coordinates(&self) -> [OrderedFloat<f64>; 4] {
        Axis::ALL.map(|axis| OrderedFloat(self.coordinate(axis)))
    }
}

/// Coordinates compare field-wise; tracker state is not part of identity.
impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        self.coordinates() == other.coordinates()
    }
}

impl Eq for Memory {}

impl Hash for Memory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coordinates().hash(state);
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<recv_rate={:.3}, send_rate={:.3}, latest_delay={:.3}, inter_packet_delay={:.3}>",
            self.recv_rate, self.send_rate, self.latest_delay, self.inter_packet_delay
        )
    }
}

fn ewma(previous: f64, sample: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * previous + alpha * sample
}

/// `rtt / min_rtt`, pinned to 1.0 when the floor is zero.
fn delay_ratio(rtt: f64, min_rtt: f64) -> f64 {
    if min_rtt <= 0.0 {
        1.0
    } else {
        rtt / min_rtt
    }
}

fn nanos_to_millis(nanos: i64) -> f64 {
    nanos as f64 / NANOS_PER_MILLI
}
