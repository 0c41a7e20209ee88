//! RAT controller configuration.

use crate::whisker::MAX_WINDOW;

/// Flow id never handed out when the counter wraps.
pub(crate) const RESERVED_FLOW_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatConfig {
    /// Upper bound on the congestion window, in packets.
    pub max_window: u32,
    /// Record every whisker the controller adopts.
    pub track: bool,
    /// Flow id stamped on the first packets.
    pub initial_flow_id: u32,
}

impl Default for RatConfig {
    fn default() -> Self {
        Self {
            max_window: MAX_WINDOW,
            track: false,
            initial_flow_id: RESERVED_FLOW_ID,
        }
    }
}

/// Next flow id, skipping the reserved value on wrap.
pub(crate) fn next_flow_id(current: u32) -> u32 {
    match current.wrapping_add(1) {
        RESERVED_FLOW_ID => RESERVED_FLOW_ID + 1,
        next => next,
    }
}
