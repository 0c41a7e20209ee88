//! The RAT per-flow controller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::memory::Memory;
use crate::simulation::{RealTime, TimeSource};
use crate::transport::socket_opt::{CongestionInstaller, SocketOptionError};
use crate::transport::{Packet, PacketSink, TransportError};
use crate::whisker::{SharedWhiskerTree, Whisker, WhiskerTree};

use super::config::{next_flow_id, RatConfig};
use super::stats::RatStats;

/// Mutable per-flow state, only touched under [`RatController`]'s lock.
#[derive(Debug)]
struct FlowState {
    memory: Memory,
    packets_sent: u64,
    packets_received: u64,
    flow_id: u32,
    congestion_window: u32,
    intersend: Duration,
    /// Nanoseconds since the epoch; `None` until the first send.
    last_send_time: Option<u64>,
    current_rule: Option<Whisker>,
    used_whiskers: Vec<Whisker>,
}

impl FlowState {
    fn new(config: &RatConfig) -> Self {
        Self {
            memory: Memory::new(),
            packets_sent: 0,
            packets_received: 0,
            flow_id: config.initial_flow_id,
            congestion_window: 0,
            intersend: Duration::ZERO,
            last_send_time: None,
            current_rule: None,
            used_whiskers: Vec::new(),
        }
    }

    fn check_backlog(&self) {
        assert!(
            self.packets_sent >= self.packets_received,
            "backlog invariant violated: packets_sent ({}) < packets_received ({})",
            self.packets_sent,
            self.packets_received
        );
    }

    /// IDLE flows restart from the root whisker.
    fn ensure_active(&mut self, root: Whisker, config: &RatConfig) {
        if self.congestion_window == 0 {
            self.adopt(root, config);
        }
    }

    fn adopt(&mut self, rule: Whisker, config: &RatConfig) {
        self.congestion_window = rule.window(self.congestion_window).min(config.max_window);
        self.intersend = rule.intersend_duration();
        if config.track && !self.used_whiskers.contains(&rule) {
            self.used_whiskers.push(rule);
        }
        self.current_rule = Some(rule);
    }

    /// Window and spacing a send attempt would use: the held ones, or the
    /// root whisker's when IDLE. Nothing is adopted.
    fn effective(&self, root: Whisker, config: &RatConfig) -> (u32, Duration) {
        if self.congestion_window == 0 {
            (root.window(0).min(config.max_window), root.intersend_duration())
        } else {
            (self.congestion_window, self.intersend)
        }
    }

    fn window_open(&self, window: u32) -> bool {
        self.packets_sent < self.packets_received.saturating_add(u64::from(window))
    }

    fn intersend_elapsed(&self, now: u64, intersend: Duration) -> bool {
        match self.last_send_time {
            None => true,
            Some(last) => now.saturating_sub(last) >= saturating_nanos(intersend),
        }
    }

    fn record_send(&mut self, now: u64) {
        self.packets_sent += 1;
        self.memory.update_sent(now as i64);
        self.last_send_time = Some(now);
    }

    /// Ack or loss accounting for the callback path; never overtakes sends.
    fn account_one(&mut self) {
        self.packets_received = (self.packets_received + 1).min(self.packets_sent);
    }
}

/// Remy-style congestion controller for one flow.
///
/// The controller owns the flow's [`Memory`] and consults a (possibly
/// hot-reloaded) [`WhiskerTree`] to pick the window and pacing for the next
/// sends. All mutating operations take one exclusive lock; transmission
/// happens after the lock is released.
///
/// There is no named state: a flow with a zero window is IDLE and restarts
/// from the root whisker on the next send attempt, otherwise it is ACTIVE.
pub struct RatController<T: TimeSource = RealTime> {
    config: RatConfig,
    whiskers: Arc<SharedWhiskerTree>,
    flow: Mutex<FlowState>,
    time_source: T,
}

impl RatController<RealTime> {
    pub fn new(tree: WhiskerTree, config: RatConfig) -> Self {
        Self::with_time_source(tree, config, RealTime::new())
    }
}

impl<T: TimeSource> RatController<T> {
    pub fn with_time_source(tree: WhiskerTree, config: RatConfig, time_source: T) -> Self {
        Self::with_shared_whiskers(Arc::new(SharedWhiskerTree::new(tree)), config, time_source)
    }

    /// Builds a controller over a tree handle shared with other controllers
    /// or with a reloader.
    pub fn with_shared_whiskers(
        whiskers: Arc<SharedWhiskerTree>,
        config: RatConfig,
        time_source: T,
    ) -> Self {
        let flow = Mutex::new(FlowState::new(&config));
        Self {
            config,
            whiskers,
            flow,
            time_source,
        }
    }

    pub fn config(&self) -> &RatConfig {
        &self.config
    }

    pub fn whiskers(&self) -> &Arc<SharedWhiskerTree> {
        &self.whiskers
    }

    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    /// Binds a throwaway listener and installs the algorithm on it through
    /// `installer`, making it available to the OS transport.
    pub async fn start(&self, installer: &impl CongestionInstaller) -> Result<(), SocketOptionError> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        installer.install(&listener)?;
        tracing::info!(
            generation = self.whiskers.root().generation(),
            "RAT congestion control started"
        );
        Ok(())
    }

    /// Decides whether a packet may leave now and, if so, builds it.
    ///
    /// Returns `None` when the window is exhausted, the intersend time has
    /// not elapsed, or `packets_sent_cap` is reached. The flow state already
    /// counts a returned packet as sent.
    ///
    /// # Panics
    ///
    /// If more packets were accounted as received than were ever sent.
    pub fn poll_send(&self, sender_id: i32, seq_no: i32, packets_sent_cap: u64) -> Option<Packet> {
        let now = self.time_source.now_nanos();
        let mut flow = self.flow.lock();
        flow.check_backlog();
        flow.ensure_active(self.whiskers.root(), &self.config);

        let (window, intersend) = (flow.congestion_window, flow.intersend);
        if !(flow.window_open(window) && flow.intersend_elapsed(now, intersend)) {
            return None;
        }
        if flow.packets_sent >= packets_sent_cap {
            tracing::trace!(sender_id, packets_sent = flow.packets_sent, "flow size cap reached");
            return None;
        }

        let packet = Packet::new(seq_no, sender_id, flow.flow_id, now as i64);
        flow.record_send(now);
        tracing::trace!(
            sender_id,
            seq_no,
            flow_id = packet.flow_id,
            window = flow.congestion_window,
            "packet authorized"
        );
        Some(packet)
    }

    /// [`poll_send`](Self::poll_send), then hands the packet to `sink` with
    /// the lock released. Sink failures are returned unmodified.
    pub async fn send<S: PacketSink>(
        &self,
        sink: &S,
        sender_id: i32,
        seq_no: i32,
        packets_sent_cap: u64,
    ) -> Result<Option<Packet>, TransportError> {
        let Some(packet) = self.poll_send(sender_id, seq_no, packets_sent_cap) else {
            return Ok(None);
        };
        sink.send_packet(&packet).await?;
        Ok(Some(packet))
    }

    /// Folds a batch of acknowledgements into the flow.
    ///
    /// Every packet in the batch counts as received. Packets of the current
    /// flow each feed their RTT to the memory, reselect the whisker and
    /// advance the flow id; then the batch goes through the memory's
    /// receive-path update. Packets without a receipt stamp are stamped now.
    pub fn receive(&self, packets: &[Packet]) {
        let now = self.time_source.now_nanos() as i64;
        let batch: Vec<Packet> = packets
            .iter()
            .map(|packet| Packet {
                received_at: packet.received_at.or(Some(now)),
                ..*packet
            })
            .collect();

        let tree = self.whiskers.snapshot();
        let mut flow = self.flow.lock();
        flow.packets_received += batch.len() as u64;
        let flow_id = flow.flow_id;

        for packet in batch.iter().filter(|packet| packet.flow_id == flow_id) {
            if let Some(rtt) = packet.rtt_nanos() {
                flow.memory.update_rtt(Duration::from_nanos(rtt as u64));
            }
            let rule = match tree.find_whisker(&flow.memory) {
                Ok(rule) => *rule,
                Err(err) => {
                    tracing::warn!(
                        %err,
                        memory = %flow.memory,
                        seq_no = packet.seq_no,
                        "no whisker for memory, keeping current rule"
                    );
                    continue;
                }
            };
            flow.adopt(rule, &self.config);
            flow.flow_id = next_flow_id(flow.flow_id);
        }
        flow.memory.update_received(&batch, flow_id);
    }

    /// When the pacing gate next opens, in nanoseconds since the epoch.
    /// Before any send that is now.
    pub fn next_event_time(&self) -> u64 {
        let flow = self.flow.lock();
        match flow.last_send_time {
            Some(last) => last.saturating_add(saturating_nanos(flow.intersend)),
            None => self.time_source.now_nanos(),
        }
    }

    /// Callback style: a packet left through some other path.
    pub fn on_packet_sent(&self, seq_no: i32) {
        let now = self.time_source.now_nanos();
        let mut flow = self.flow.lock();
        flow.record_send(now);
        tracing::trace!(seq_no, packets_sent = flow.packets_sent, "packet sent");
    }

    /// Callback style: `seq_no` was acknowledged after `rtt`.
    pub fn on_packet_acked(&self, seq_no: i32, rtt: Duration) {
        let mut flow = self.flow.lock();
        flow.account_one();
        flow.memory.update_rtt(rtt);
        self.reselect(&mut flow);
        tracing::trace!(seq_no, window = flow.congestion_window, "packet acked");
    }

    /// Callback style: a packet was declared lost. The whisker is reselected
    /// from the memory as it stands.
    pub fn on_packet_lost(&self) {
        let mut flow = self.flow.lock();
        flow.account_one();
        self.reselect(&mut flow);
        tracing::debug!(window = flow.congestion_window, "packet lost");
    }

    /// Whether a send would be authorized right now, ignoring any flow cap.
    /// An IDLE flow is judged by the root whisker but stays IDLE.
    pub fn can_send(&self) -> bool {
        let now = self.time_source.now_nanos();
        let flow = self.flow.lock();
        let (window, intersend) = flow.effective(self.whiskers.root(), &self.config);
        flow.window_open(window) && flow.intersend_elapsed(now, intersend)
    }

    /// Pacing rate in packets per second, `None` when sends are unpaced.
    pub fn send_rate(&self) -> Option<f64> {
        let intersend = self.flow.lock().intersend;
        (!intersend.is_zero()).then(|| 1.0 / intersend.as_secs_f64())
    }

    pub fn congestion_window(&self) -> u32 {
        self.flow.lock().congestion_window
    }

    pub fn packets_sent(&self) -> u64 {
        self.flow.lock().packets_sent
    }

    /// Whiskers adopted so far, in first-use order. Empty unless tracking
    /// is enabled.
    pub fn used_whiskers(&self) -> Vec<Whisker> {
        self.flow.lock().used_whiskers.clone()
    }

    pub fn stats(&self) -> RatStats {
        let flow = self.flow.lock();
        RatStats {
            packets_sent: flow.packets_sent,
            packets_received: flow.packets_received,
            congestion_window: flow.congestion_window,
            intersend: flow.intersend,
            flow_id: flow.flow_id,
            generation: flow.current_rule.map(|rule| rule.generation()),
            memory: flow.memory,
            min_rtt: flow.memory.min_rtt(),
        }
    }

    /// Restarts the flow: counters, memory and rule are discarded.
    pub fn reset(&self) {
        *self.flow.lock() = FlowState::new(&self.config);
        tracing::debug!("flow reset");
    }

    fn reselect(&self, flow: &mut FlowState) {
        match self.whiskers.snapshot().find_whisker(&flow.memory) {
            Ok(rule) => flow.adopt(*rule, &self.config),
            Err(err) => {
                tracing::warn!(%err, memory = %flow.memory, "no whisker for memory, keeping current rule")
            }
        }
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl<T: TimeSource> std::fmt::Debug for RatController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatController")
            .field("config", &self.config)
            .field("flow", &*self.flow.lock())
            .finish()
    }
}
