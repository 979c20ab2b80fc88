//! Read-only observer of the MAC's link status lines.
//!
//! The sink takes [`PhyStatus`] by value each cycle and has no path back to
//! the producer, so it cannot gate or delay either handshake.

use serde::{Deserialize, Serialize};

use crate::producer::PhyStatus;
use crate::tracing::prelude::*;

/// A change of any status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub cycle: u64,
    pub status: PhyStatus,
}

#[derive(Debug, Default)]
pub struct LinkStatusSink {
    current: PhyStatus,
    observed: bool,
    changes: Vec<StatusChange>,
    link_drops: u64,
}

impl LinkStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the status lines for one cycle.
    pub fn observe(&mut self, cycle: u64, status: PhyStatus) {
        if self.observed && status == self.current {
            return;
        }
        if self.observed && self.current.link_up != status.link_up {
            if status.link_up {
                info!(cycle, "Link status: up");
            } else {
                warn!(cycle, "Link status: down");
                self.link_drops += 1;
            }
        }
        self.observed = true;
        self.current = status;
        self.changes.push(StatusChange { cycle, status });
    }

    pub fn link_up(&self) -> bool {
        self.current.link_up
    }

    pub fn phy_reset(&self) -> bool {
        self.current.phy_reset
    }

    pub fn status(&self) -> PhyStatus {
        self.current
    }

    /// Every distinct status seen, starting with the first observation.
    pub fn changes(&self) -> &[StatusChange] {
        &self.changes
    }

    /// Cycle at which the link first came up.
    pub fn link_up_at(&self) -> Option<u64> {
        self.changes
            .iter()
            .find(|c| c.status.link_up)
            .map(|c| c.cycle)
    }

    pub fn link_drops(&self) -> u64 {
        self.link_drops
    }
}
