//! Control rules ("whiskers") and the tree that maps memory to them.
//!
//! - [`Whisker`]: one immutable window/intersend directive plus its domain.
//! - [`WhiskerTree`]: arena-backed lookup structure over memory space.
//! - [`SharedWhiskerTree`]: read-mostly handle for trees that may be
//!   hot-reloaded while controllers are running.
//! - [`persistence`]: the versioned on-disk table format.
//! - [`generate`]: grid generation of candidate whiskers from a config range.

pub mod generate;
pub mod persistence;
mod rule;
mod shared;
mod tree;

pub use generate::{generate_whiskers, ConfigRange, DomainRange, Range};
pub use persistence::{load_whiskers, load_whiskers_into, save_whiskers, LoadMode, PersistenceError};
pub use rule::{Whisker, MAX_WINDOW};
pub use shared::SharedWhiskerTree;
pub use tree::{InsertMode, NodeId, WhiskerTree};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WhiskerError {
    #[error("whisker with generation {incoming} conflicts with generation {existing} already in the domain")]
    Conflict { incoming: u32, existing: u32 },
    #[error("memory not found in the tree")]
    NotFound,
}
