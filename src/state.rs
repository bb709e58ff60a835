//! State shared between caller-initiated operations and the dispatcher

use serde::Serialize;

use crate::connection::ConnectionState;
use crate::device::SlotTable;
use crate::sync::Signal;

/// Everything the dispatcher and the public operations both touch
#[derive(Default)]
pub struct LinkState {
    pub connection: ConnectionState,
    pub slots: SlotTable,
    pub stats: LinkStats,
}

/// Shared handle to [`LinkState`]
pub type SharedState = Signal<LinkState>;

/// Operation and notification counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Public operations attempted
    pub operations: u64,
    /// Public operations that returned an error
    pub failed_operations: u64,
    /// Stream state change notifications applied
    pub state_changes: u64,
    /// Streams that entered the error state
    pub stream_errors: u64,
    /// Control confirmations applied
    pub confirmations: u64,
    /// Control writes whose confirmation never arrived
    pub unconfirmed_controls: u64,
}

impl LinkStats {
    pub fn success_rate(&self) -> f64 {
        if self.operations == 0 {
            1.0
        } else {
            (self.operations - self.failed_operations) as f64 / self.operations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut stats = LinkStats::default();
        assert_eq!(stats.success_rate(), 1.0);
        stats.operations = 4;
        stats.failed_operations = 1;
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
