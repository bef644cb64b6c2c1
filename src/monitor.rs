//! Tracks the nodes on the bus through their `NodeStatus` heartbeats.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use embedded_time::duration::Milliseconds;
use embedded_time::Clock;
use log::info;

use crate::dsdl::node_status::{Mode, NodeStatus};
use crate::time::timestamp_expired;
use crate::types::*;

/// What the monitor knows about one node.
#[derive(Debug)]
pub struct NodeEntry<C: Clock> {
    pub status: NodeStatus,
    pub first_seen: Timestamp<C>,
    pub last_seen: Timestamp<C>,
}

/// Outcome of a heartbeat, for logging and bookkeeping by the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeChange {
    /// Not seen before, or seen again after going offline.
    Appeared,
    /// Uptime went backwards.
    Restarted,
    Unchanged,
}

#[derive(Debug)]
pub struct NodeMonitor<C: Clock> {
    nodes: BTreeMap<NodeId, NodeEntry<C>>,
    timeout: Milliseconds<u32>,
}

impl<C> NodeMonitor<C>
where
    C: Clock,
    C::T: TryFrom<u32>,
{
    /// A node is considered gone after `timeout` without a heartbeat.
    pub fn new(timeout: Milliseconds<u32>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            timeout,
        }
    }

    /// Record a heartbeat.
    pub fn update(&mut self, node_id: NodeId, status: NodeStatus, now: Timestamp<C>) -> NodeChange {
        match self.nodes.get_mut(&node_id) {
            Some(entry) => {
                let change = if status.uptime_sec < entry.status.uptime_sec {
                    info!("node {} restarted", node_id);
                    entry.first_seen = now;
                    NodeChange::Restarted
                } else {
                    NodeChange::Unchanged
                };
                entry.status = status;
                entry.last_seen = now;
                change
            }
            None => {
                info!(
                    "node {} appeared, uptime {} s, health {}, mode {}",
                    node_id, status.uptime_sec, status.health, status.mode
                );
                self.nodes.insert(
                    node_id,
                    NodeEntry {
                        status,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                NodeChange::Appeared
            }
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeEntry<C>> {
        self.nodes.get(&node_id)
    }

    /// Whether `node_id` has sent a heartbeat recently and isn't shutting down.
    pub fn is_online(&self, node_id: NodeId, now: Timestamp<C>) -> bool {
        match self.nodes.get(&node_id) {
            Some(entry) => {
                !timestamp_expired(self.timeout, now, entry.last_seen)
                    && entry.status.mode() != Some(Mode::Offline)
            }
            None => false,
        }
    }

    /// IDs of the nodes currently online, ascending.
    pub fn online_nodes(&self, now: Timestamp<C>) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| self.is_online(*id, now))
            .collect()
    }

    /// Forget nodes that went silent. Returns their IDs.
    pub fn expire(&mut self, now: Timestamp<C>) -> Vec<NodeId> {
        let timeout = self.timeout;
        let mut gone = Vec::new();
        self.nodes.retain(|node_id, entry| {
            let expired = timestamp_expired(timeout, now, entry.last_seen);
            if expired {
                info!("node {} went offline", node_id);
                gone.push(*node_id);
            }
            !expired
        });
        gone
    }
}
