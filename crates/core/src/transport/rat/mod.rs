//! RAT: a Remy-style learned congestion controller.
//!
//! The sender keeps a four-signal [`Memory`](crate::memory::Memory) of its
//! recent send/receive timing, looks that memory up in a trained
//! [`WhiskerTree`](crate::whisker::WhiskerTree), and lets the matching
//! whisker set its congestion window and inter-send spacing.
//!
//! ## Send gate
//!
//! A packet is authorized only when all of these hold:
//!
//! | Condition | Meaning |
//! |-----------|---------|
//! | `packets_sent < packets_received + window` | window not exhausted |
//! | `now - last_send >= intersend` | pacing interval elapsed |
//! | `packets_sent < cap` | flow size limit not reached |
//!
//! A zero window means IDLE: the next send attempt reinitialises the window
//! from the root whisker as `root.window(0)`. A root whisker with a zero
//! increment therefore never authorizes a send.
//!
//! ## Flow ids
//!
//! Every acknowledgement of the current flow advances the flow id, which
//! skips 0 when it wraps. Acknowledgements carrying an older flow id still
//! count as received but do not steer the controller.
//!
//! ## Two APIs, one state machine
//!
//! [`RatController::poll_send`]/[`RatController::receive`] are the primary
//! batch interface. `on_packet_sent`, `on_packet_acked` and `on_packet_lost`
//! drive the same flow state for callers that already own transmission.

mod config;
mod controller;
mod gang;
mod stats;


pub use config::RatConfig;
pub use controller::RatController;
pub use gang::{Feedback, GangConfig, GangReport, SenderGang, SenderReport};
pub use stats::RatStats;
