//! Single-bottleneck link model for exercising controllers without sockets.
//!
//! Packets are encoded on entry and decoded on exit, so the wire codec is on
//! the simulated path. Each packet waits for the link to be free, occupies
//! it for one service time (`1 / link_ppt` ms), then travels for one RTT
//! before its acknowledgement is available to the sender.
//!
//! Lost packets are not silent: a loss notice becomes available when the
//! acknowledgement would have arrived (random loss) or one RTT after the
//! arrival was refused (queue overflow).

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;

use super::{SimulationRng, TimeSource};
use crate::transport::{Packet, PacketSink, TransportError};

/// Packets waiting for service before arrivals are tail-dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct SimLinkConfig {
    /// Link rate, packets per millisecond.
    pub link_ppt: f64,
    /// Round-trip propagation delay added after service.
    pub rtt: Duration,
    /// Probability that an accepted packet is lost.
    pub loss: f64,
    /// Packets not yet served; packets in propagation do not count.
    pub queue_capacity: usize,
}

impl Default for SimLinkConfig {
    fn default() -> Self {
        Self {
            link_ppt: 1.0,
            rtt: Duration::from_millis(150),
            loss: 0.0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SimLinkConfig {
    fn service_nanos(&self) -> u64 {
        if self.link_ppt > 0.0 && self.link_ppt.is_finite() {
            (1_000_000.0 / self.link_ppt).round() as u64
        } else {
            0
        }
    }

    fn rtt_nanos(&self) -> u64 {
        u64::try_from(self.rtt.as_nanos()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub accepted: u64,
    pub delivered: u64,
    pub dropped_queue_full: u64,
    pub dropped_loss: u64,
    pub garbled: u64,
}

#[derive(Debug)]
enum Fate {
    Deliver { frame: Bytes, sent: Packet },
    Lost(Packet),
}

#[derive(Debug)]
struct InFlight {
    /// When service ends.
    departs: u64,
    /// When the acknowledgement (or loss notice) is due.
    due: u64,
    fate: Fate,
}

#[derive(Debug, Default)]
struct LinkState {
    /// Ordered by `departs` and `due`, since service is FIFO.
    in_flight: VecDeque<InFlight>,
    /// Refused arrivals and the time their loss becomes known.
    refused: VecDeque<(u64, Packet)>,
    acked: Vec<Packet>,
    lost: Vec<Packet>,
    link_free_at: u64,
    stats: LinkStats,
}

impl LinkState {
    /// Packets accepted and not yet fully served at `now`.
    fn backlog(&self, now: u64) -> usize {
        self.in_flight
            .iter()
            .rev()
            .take_while(|entry| entry.departs > now)
            .count()
    }

    /// Moves everything due by `now` into the ack and loss outboxes.
    fn settle<T: TimeSource>(&mut self, now: u64, clock: &T) {
        while self.in_flight.front().is_some_and(|entry| entry.due <= now) {
            let Some(entry) = self.in_flight.pop_front() else {
                break;
            };
            match entry.fate {
                Fate::Deliver { frame, sent } => match Packet::decode_received(&frame, clock) {
                    Ok(packet) => {
                        self.stats.delivered += 1;
                        self.acked.push(packet);
                    }
                    Err(err) => {
                        self.stats.garbled += 1;
                        tracing::debug!(%err, "dropping garbled frame");
                        self.lost.push(sent);
                    }
                },
                Fate::Lost(packet) => self.lost.push(packet),
            }
        }
        while self.refused.front().is_some_and(|(due, _)| *due <= now) {
            if let Some((_, packet)) = self.refused.pop_front() {
                self.lost.push(packet);
            }
        }
    }
}

/// A shared bottleneck link.
pub struct SimLink<T: TimeSource> {
    config: SimLinkConfig,
    service_nanos: u64,
    rtt_nanos: u64,
    time_source: T,
    rng: SimulationRng,
    state: Mutex<LinkState>,
}

impl<T: TimeSource> SimLink<T> {
    pub fn new(config: SimLinkConfig, time_source: T, rng: SimulationRng) -> Self {
        Self {
            service_nanos: config.service_nanos(),
            rtt_nanos: config.rtt_nanos(),
            config,
            time_source,
            rng,
            state: Mutex::new(LinkState::default()),
        }
    }

    pub fn config(&self) -> &SimLinkConfig {
        &self.config
    }

    /// Offers a packet to the link. Returns whether it was accepted; a lost
    /// packet counts as accepted, its loss notice comes back instead of an
    /// acknowledgement.
    pub fn transmit(&self, packet: &Packet) -> bool {
        let now = self.time_source.now_nanos();
        let mut state = self.state.lock();
        if state.backlog(now) >= self.config.queue_capacity {
            state.stats.dropped_queue_full += 1;
            state
                .refused
                .push_back((now.saturating_add(self.rtt_nanos), *packet));
            tracing::debug!(seq_no = packet.seq_no, "link queue full, packet dropped");
            return false;
        }
        state.stats.accepted += 1;

        let departs = state.link_free_at.max(now).saturating_add(self.service_nanos);
        state.link_free_at = departs;
        let fate = if self.rng.gen_bool(self.config.loss) {
            state.stats.dropped_loss += 1;
            tracing::debug!(seq_no = packet.seq_no, "packet lost on link");
            Fate::Lost(*packet)
        } else {
            Fate::Deliver {
                frame: packet.to_bytes(),
                sent: *packet,
            }
        };
        state.in_flight.push_back(InFlight {
            departs,
            due: departs.saturating_add(self.rtt_nanos),
            fate,
        });
        true
    }

    /// Acknowledgements due by now, decoded and stamped with the receipt
    /// time. Frames that fail to decode are counted and reported as lost.
    pub fn take_delivered(&self) -> Vec<Packet> {
        let now = self.time_source.now_nanos();
        let mut state = self.state.lock();
        state.settle(now, &self.time_source);
        std::mem::take(&mut state.acked)
    }

    /// Packets whose loss became known by now, whether lost in flight,
    /// refused by a full queue or garbled.
    pub fn take_lost(&self) -> Vec<Packet> {
        let now = self.time_source.now_nanos();
        let mut state = self.state.lock();
        state.settle(now, &self.time_source);
        std::mem::take(&mut state.lost)
    }

    /// When the next acknowledgement or loss notice becomes available.
    pub fn next_delivery(&self) -> Option<u64> {
        let state = self.state.lock();
        let in_flight = state.in_flight.front().map(|entry| entry.due);
        let refused = state.refused.front().map(|(due, _)| *due);
        in_flight.into_iter().chain(refused).min()
    }

    /// Packets waiting for or in service right now.
    pub fn queued(&self) -> usize {
        let now = self.time_source.now_nanos();
        self.state.lock().backlog(now)
    }

    pub fn stats(&self) -> LinkStats {
        self.state.lock().stats
    }
}

impl<T: TimeSource> PacketSink for SimLink<T> {
    async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        self.transmit(packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::VirtualTime;

    const MS: u64 = 1_000_000;

    fn link(config: SimLinkConfig) -> (SimLink<VirtualTime>, VirtualTime) {
        let time = VirtualTime::new();
        (SimLink::new(config, time.clone(), SimulationRng::new(3)), time)
    }

    #[test]
    fn test_delivery_after_service_and_rtt() {
        let (link, time) = link(SimLinkConfig {
            link_ppt: 1.0,
            rtt: Duration::from_millis(100),
            ..Default::default()
        });
        assert!(link.transmit(&Packet::new(0, 1, 1, 0)));
        assert!(link.transmit(&Packet::new(1, 1, 1, 0)));
        assert_eq!(link.next_delivery(), Some(101 * MS));

        time.advance(Duration::from_millis(100));
        assert!(link.take_delivered().is_empty());

        time.advance(Duration::from_millis(1));
        let first = link.take_delivered();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].seq_no, 0);
        assert_eq!(first[0].received_at, Some((101 * MS) as i64));

        time.advance(Duration::from_millis(1));
        assert_eq!(link.take_delivered()[0].seq_no, 1);
        assert_eq!(link.stats().delivered, 2);
    }

    #[test]
    fn test_queue_is_bounded() {
        let (link, _time) = link(SimLinkConfig {
            queue_capacity: 3,
            ..Default::default()
        });
        let accepted = (0..5)
            .filter(|&seq| link.transmit(&Packet::new(seq, 0, 1, 0)))
            .count();
        assert_eq!(accepted, 3);
        assert_eq!(link.queued(), 3);
        assert_eq!(link.stats().dropped_queue_full, 2);
    }

    #[test]
    fn test_queue_counts_only_unserved_packets() {
        // 10 packets/ms with 150ms RTT: the pipe holds far more packets
        // than the queue allows, but the queue itself stays short.
        let (link, time) = link(SimLinkConfig {
            link_ppt: 10.0,
            rtt: Duration::from_millis(150),
            queue_capacity: 3,
            ..Default::default()
        });
        for seq in 0..3000 {
            assert!(link.transmit(&Packet::new(seq, 0, 1, 0)));
            time.advance(Duration::from_micros(100));
            assert!(link.queued() <= 1);
        }
        assert_eq!(link.stats().dropped_queue_full, 0);
        assert_eq!(link.stats().accepted, 3000);
    }

    #[test]
    fn test_lost_packets_are_reported_after_rtt() {
        let (link, time) = link(SimLinkConfig {
            rtt: Duration::from_millis(100),
            loss: 1.0,
            ..Default::default()
        });
        assert!(link.transmit(&Packet::new(4, 2, 7, 0)));
        time.advance(Duration::from_millis(100));
        assert!(link.take_lost().is_empty());

        time.advance(Duration::from_millis(1));
        assert!(link.take_delivered().is_empty());
        let lost = link.take_lost();
        assert_eq!(lost, vec![Packet::new(4, 2, 7, 0)]);
        assert!(link.take_lost().is_empty());
        assert_eq!(link.next_delivery(), None);
    }

    #[test]
    fn test_refused_packets_are_reported_lost() {
        let (link, time) = link(SimLinkConfig {
            rtt: Duration::from_millis(50),
            queue_capacity: 1,
            ..Default::default()
        });
        assert!(link.transmit(&Packet::new(0, 0, 1, 0)));
        assert!(!link.transmit(&Packet::new(1, 0, 1, 0)));
        assert_eq!(link.next_delivery(), Some(50 * MS));

        time.advance(Duration::from_millis(50));
        assert_eq!(link.take_lost(), vec![Packet::new(1, 0, 1, 0)]);
        assert!(link.take_delivered().is_empty());

        time.advance(Duration::from_millis(1));
        assert_eq!(link.take_delivered()[0].seq_no, 0);
    }

    #[test]
    fn test_huge_rtt_saturates() {
        let (link, _time) = link(SimLinkConfig {
            rtt: Duration::MAX,
            ..Default::default()
        });
        assert!(link.transmit(&Packet::new(0, 0, 1, 0)));
        assert_eq!(link.next_delivery(), Some(u64::MAX));
        assert!(link.take_delivered().is_empty());
    }

    #[test]
    fn test_total_loss_delivers_nothing() {
        let (link, time) = link(SimLinkConfig {
            loss: 1.0,
            ..Default::default()
        });
        for seq in 0..10 {
            link.transmit(&Packet::new(seq, 0, 1, 0));
        }
        time.advance(Duration::from_secs(10));
        assert!(link.take_delivered().is_empty());
        assert_eq!(link.take_lost().len(), 10);
        assert_eq!(link.stats().dropped_loss, 10);
    }

    #[test]
    fn test_default_queue_capacity() {
        assert_eq!(SimLinkConfig::default().queue_capacity, 1000);
    }

    #[tokio::test]
    async fn test_sink_hands_packets_to_link() {
        let (link, _time) = link(SimLinkConfig::default());
        link.send_packet(&Packet::new(0, 0, 1, 0)).await.unwrap();
        assert_eq!(link.stats().accepted, 1);
    }
}
