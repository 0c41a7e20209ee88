//! Grid generation of candidate whiskers.
//!
//! A [`ConfigRange`] describes the network scenarios a table is meant for and
//! the parameter grid to enumerate. Generation is a plain cartesian product;
//! no training or evaluation happens here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryRange;

use super::persistence::{MemoryRecord, PersistenceError};
use super::Whisker;

/// Closed numeric interval `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

impl Range {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.low <= value && value <= self.high
    }
}

/// Bounds of one generated domain, in table record field names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainRange {
    pub lower: MemoryRecord,
    pub upper: MemoryRecord,
}

impl From<DomainRange> for MemoryRange {
    fn from(domain: DomainRange) -> Self {
        MemoryRange::new(domain.lower.into(), domain.upper.into())
    }
}

impl Default for DomainRange {
    fn default() -> Self {
        let full = MemoryRange::full();
        Self {
            lower: full.lower().into(),
            upper: full.upper().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRange {
    /// Link rate, packets per millisecond.
    #[serde(default = "defaults::link_ppt")]
    pub link_ppt: Range,
    /// Round-trip time, milliseconds.
    #[serde(default = "defaults::rtt")]
    pub rtt: Range,
    #[serde(default = "defaults::num_senders")]
    pub num_senders: Range,
    /// Mean on/off durations of each sender, milliseconds.
    #[serde(default = "defaults::mean_duration")]
    pub mean_on_duration: Range,
    #[serde(default = "defaults::mean_duration")]
    pub mean_off_duration: Range,

    /// Generations `0..generations` are emitted.
    pub generations: u32,
    pub window_increments: Vec<i32>,
    pub window_multiples: Vec<f64>,
    pub intersends: Vec<f64>,
    #[serde(default = "defaults::domains")]
    pub domains: Vec<DomainRange>,
}

mod defaults {
    use super::{DomainRange, Range};

    pub fn link_ppt() -> Range {
        Range::new(1.0, 1.0)
    }

    pub fn rtt() -> Range {
        Range::new(150.0, 150.0)
    }

    pub fn num_senders() -> Range {
        Range::new(8.0, 8.0)
    }

    pub fn mean_duration() -> Range {
        Range::new(5000.0, 5000.0)
    }

    pub fn domains() -> Vec<DomainRange> {
        vec![DomainRange::default()]
    }
}

impl ConfigRange {
    pub fn from_toml_str(source: &str) -> Result<Self, PersistenceError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Number of whiskers [`generate_whiskers`] yields for this config.
    pub fn grid_size(&self) -> usize {
        self.generations as usize
            * self.window_increments.len()
            * self.window_multiples.len()
            * self.intersends.len()
            * self.domains.len()
    }
}

/// Enumerates `generation × increment × multiple × intersend × domain`, in
/// that nesting order.
pub fn generate_whiskers(config: &ConfigRange) -> Vec<Whisker> {
    let mut whiskers = Vec::with_capacity(config.grid_size());
    for generation in 0..config.generations {
        for &increment in &config.window_increments {
            for &multiple in &config.window_multiples {
                for &intersend in &config.intersends {
                    for &domain in &config.domains {
                        whiskers.push(Whisker::new(
                            generation,
                            increment,
                            multiple,
                            intersend,
                            domain.into(),
                        ));
                    }
                }
            }
        }
    }
    tracing::debug!(count = whiskers.len(), "generated whiskers");
    whiskers
}
