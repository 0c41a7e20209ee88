//! Deterministic harness for running RAT controllers off the network.
//!
//! - **TimeSource**: abstraction over time (real vs virtual)
//! - **VirtualTime**: a clock that only advances when explicitly stepped
//! - **SimulationRng**: seeded RNG for every random decision of a run
//! - **SimLink**: bottleneck link with a bounded queue, RTT and random loss
//!
//! ```ignore
//! let time = VirtualTime::new();
//! let link = SimLink::new(SimLinkConfig::default(), time.clone(), SimulationRng::new(7));
//! let rat = RatController::with_time_source(tree, RatConfig::default(), time.clone());
//!
//! rat.poll_send(1, seq, u32::MAX);
//! time.advance(Duration::from_millis(1));
//! rat.receive(&link.take_delivered());
//! for _ in link.take_lost() {
//!     rat.on_packet_lost();
//! }
//! ```

pub mod network;
mod rng;
mod time;

pub use network::{LinkStats, SimLink, SimLinkConfig};
pub use rng::SimulationRng;
pub use time::{RealTime, TimeSource, VirtualTime};
