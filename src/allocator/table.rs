//! Unique ID to node ID bindings handed out by the allocator.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::AllocationError;
use crate::types::*;

/// One binding, in the shape an application would persist it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub unique_id: UniqueId,
}

/// Bidirectional map between unique IDs and node IDs.
///
/// Both directions are kept unique: a node ID is bound to at most one
/// unique ID and the other way around.
#[derive(Clone, Debug, Default)]
pub struct AllocationTable {
    by_unique_id: BTreeMap<UniqueId, NodeId>,
    by_node_id: BTreeMap<NodeId, UniqueId>,
}

impl AllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from persisted records.
    pub fn from_records<I>(records: I) -> Result<Self, AllocationError>
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let mut table = Self::new();
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    /// All bindings, ordered by node ID.
    pub fn records(&self) -> Vec<NodeRecord> {
        self.by_node_id
            .iter()
            .map(|(node_id, unique_id)| NodeRecord {
                node_id: *node_id,
                unique_id: *unique_id,
            })
            .collect()
    }

    pub fn node_id_of(&self, unique_id: &UniqueId) -> Option<NodeId> {
        self.by_unique_id.get(unique_id).copied()
    }

    pub fn unique_id_of(&self, node_id: NodeId) -> Option<&UniqueId> {
        self.by_node_id.get(&node_id)
    }

    pub fn is_allocated(&self, node_id: NodeId) -> bool {
        self.by_node_id.contains_key(&node_id)
    }

    /// Add a binding. Re-inserting an existing binding is a no-op, anything
    /// that would rebind either side is refused.
    pub fn insert(&mut self, record: NodeRecord) -> Result<(), AllocationError> {
        if record.node_id == 0 || record.node_id > MAX_NODE_ID {
            return Err(AllocationError::UniqueIdConflict {
                node_id: record.node_id,
            });
        }

        match (
            self.by_unique_id.get(&record.unique_id),
            self.by_node_id.get(&record.node_id),
        ) {
            (Some(node_id), _) if *node_id == record.node_id => Ok(()),
            (None, None) => {
                self.by_unique_id.insert(record.unique_id, record.node_id);
                self.by_node_id.insert(record.node_id, record.unique_id);
                Ok(())
            }
            _ => Err(AllocationError::UniqueIdConflict {
                node_id: record.node_id,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.by_node_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node_id.is_empty()
    }
}
