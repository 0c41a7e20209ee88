//! Remy-style learned congestion control.
//!
//! A trained rule table ([`whisker::WhiskerTree`]) maps a sender's view of
//! the network ([`memory::Memory`]) to a congestion action. The RAT sender
//! ([`transport::rat::RatController`]) keeps that memory up to date from
//! its own sends and acknowledgements and paces packets accordingly.

/// CLI arguments and logger setup for the binaries.
pub mod config;

/// The four-signal network memory and its hyper-rectangular ranges.
pub mod memory;

/// Deterministic time, seeded randomness and a simulated bottleneck link.
pub mod simulation;

/// Tracing subscriber initialisation.
pub mod tracing;

/// Packets on the wire and the RAT sender.
pub mod transport;

/// Rules, the rule tree, generation and persistence.
pub mod whisker;
