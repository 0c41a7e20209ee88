//! A gang of on/off senders sharing one controller.
//!
//! Each sender is a tokio task that alternates between exponentially
//! distributed "on" and "off" periods. While on, it asks the controller for
//! permission to send and hands authorized packets to the sink; otherwise it
//! sleeps for the poll interval. Receiver tasks feed acknowledgements and
//! loss notices back. Everything stops on a shared watch signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::simulation::{SimLink, SimulationRng, TimeSource};
use crate::transport::{Packet, PacketSink, TransportError};

use super::RatController;

#[derive(Debug, Clone)]
pub struct GangConfig {
    pub num_senders: usize,
    pub mean_on: Duration,
    pub mean_off: Duration,
    /// How long a blocked sender waits before asking again.
    pub poll_interval: Duration,
    /// Flow size limit passed on every send.
    pub packets_sent_cap: u64,
}

impl Default for GangConfig {
    fn default() -> Self {
        Self {
            num_senders: 8,
            mean_on: Duration::from_secs(5),
            mean_off: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            packets_sent_cap: u64::MAX,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub sender_id: i32,
    pub packets_sent: u64,
    /// On/off transitions taken.
    pub switches: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GangReport {
    pub senders: Vec<SenderReport>,
    pub acks_received: u64,
    pub losses_reported: u64,
}

/// What a receiver task learned from the network since its last poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub acked: Vec<Packet>,
    /// Packets known to be lost; each one goes through `on_packet_lost`.
    pub lost: Vec<Packet>,
}

impl Feedback {
    /// Drains the acknowledgements and loss notices the link has ready.
    pub fn from_link<T: TimeSource>(link: &SimLink<T>) -> Self {
        Self {
            acked: link.take_delivered(),
            lost: link.take_lost(),
        }
    }
}

impl GangReport {
    pub fn packets_sent(&self) -> u64 {
        self.senders.iter().map(|sender| sender.packets_sent).sum()
    }
}

pub struct SenderGang {
    shutdown: watch::Sender<bool>,
    senders: Vec<JoinHandle<Result<SenderReport, TransportError>>>,
    receivers: Vec<JoinHandle<(u64, u64)>>,
}

impl SenderGang {
    /// Spawns `config.num_senders` sender tasks. Sender `i` draws its on/off
    /// periods from `rng.child_with_index(i)`.
    pub fn spawn<T, S>(
        controller: Arc<RatController<T>>,
        sink: Arc<S>,
        config: &GangConfig,
        rng: &SimulationRng,
    ) -> Self
    where
        T: TimeSource,
        S: PacketSink,
    {
        let (shutdown, _) = watch::channel(false);
        let senders = (0..config.num_senders)
            .map(|index| {
                let task = SenderTask {
                    sender_id: index as i32,
                    controller: controller.clone(),
                    sink: sink.clone(),
                    rng: rng.child_with_index(index as u64),
                    config: config.clone(),
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(task.run())
            })
            .collect();
        Self {
            shutdown,
            senders,
            receivers: Vec::new(),
        }
    }

    /// Every `poll_interval`, polls `feedback`, folds acknowledgements into
    /// the controller and reports each lost packet, until the gang stops.
    pub fn spawn_receiver<T, F>(
        &mut self,
        controller: Arc<RatController<T>>,
        poll_interval: Duration,
        mut feedback: F,
    ) where
        T: TimeSource,
        F: FnMut() -> Feedback + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let time = controller.time_source().clone();
            let (mut received, mut lost) = (0, 0);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = time.sleep(poll_interval) => {}
                }
                let Feedback { acked, lost: losses } = feedback();
                if !acked.is_empty() {
                    received += acked.len() as u64;
                    controller.receive(&acked);
                }
                for packet in &losses {
                    tracing::trace!(seq_no = packet.seq_no, sender_id = packet.sender_id, "loss reported");
                    controller.on_packet_lost();
                }
                lost += losses.len() as u64;
            }
            (received, lost)
        });
        self.receivers.push(handle);
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits for every sender to finish, then stops the receivers.
    ///
    /// Returns the first sender error, if any. A panicking task (e.g. a
    /// broken backlog invariant) is re-raised here.
    pub async fn join(self) -> Result<GangReport, TransportError> {
        let mut report = GangReport::default();
        let mut first_error = None;
        for handle in self.senders {
            match handle.await {
                Ok(Ok(sender)) => report.senders.push(sender),
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => tracing::debug!(%err, "sender task cancelled"),
            }
        }

        self.shutdown.send_replace(true);
        for handle in self.receivers {
            match handle.await {
                Ok((received, lost)) => {
                    report.acks_received += received;
                    report.losses_reported += lost;
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => tracing::debug!(%err, "receiver task cancelled"),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    pub async fn shutdown(self) -> Result<GangReport, TransportError> {
        self.stop();
        self.join().await
    }
}

struct SenderTask<T: TimeSource, S> {
    sender_id: i32,
    controller: Arc<RatController<T>>,
    sink: Arc<S>,
    rng: SimulationRng,
    config: GangConfig,
    shutdown: watch::Receiver<bool>,
}

impl<T: TimeSource, S: PacketSink> SenderTask<T, S> {
    async fn run(mut self) -> Result<SenderReport, TransportError> {
        let time = self.controller.time_source().clone();
        let mut report = SenderReport {
            sender_id: self.sender_id,
            ..Default::default()
        };
        let mut on = true;
        let mut switch_at = time.now_nanos().saturating_add(self.period(on));
        let mut seq_no = 0i32;

        while !*self.shutdown.borrow() {
            let now = time.now_nanos();
            if now >= switch_at {
                on = !on;
                report.switches += 1;
                switch_at = now.saturating_add(self.period(on));
                tracing::debug!(sender_id = self.sender_id, on, "sender switched");
            }

            if on {
                let sent = self
                    .controller
                    .send(&*self.sink, self.sender_id, seq_no, self.config.packets_sent_cap)
                    .await
                    .inspect_err(|err| {
                        tracing::error!(sender_id = self.sender_id, %err, "send failed, stopping sender")
                    })?;
                if sent.is_some() {
                    seq_no = seq_no.wrapping_add(1);
                    report.packets_sent += 1;
                    tokio::task::yield_now().await;
                    continue;
                }
            }

            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = time.sleep(self.config.poll_interval) => {}
            }
        }
        Ok(report)
    }

    fn period(&self, on: bool) -> u64 {
        let mean = if on {
            self.config.mean_on
        } else {
            self.config.mean_off
        };
        u64::try_from(self.rng.gen_exponential(mean).as_nanos()).unwrap_or(u64::MAX)
    }
}
