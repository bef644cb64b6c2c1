//! Dynamic node ID allocation server.
//!
//! A node without an ID broadcasts anonymous `Allocation` requests carrying
//! its 16-byte unique ID, at most 6 bytes at a time. The server echoes the
//! prefix it has accumulated so far, which tells the requester to send the
//! next part. Once all 16 bytes are in, the server picks a node ID and
//! broadcasts it together with the full unique ID.
//!
//! Several unallocated nodes can be racing at once. Each first request opens
//! a session keyed by its fragment. A follow-up request carries nothing that
//! names its session, so it extends the session whose prefix was echoed
//! last. When a follow-up was already on the wire as another node's first
//! request came in, it lands in the newer session. The echo then matches
//! neither requester, both start over, and the mixed session is dropped once
//! it overflows 16 bytes or times out.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use embedded_time::Clock;
use log::{debug, info, warn};

use crate::dsdl::allocation::{Allocation, ANY_NODE_ID, MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST};
use crate::dsdl::DataType;
use crate::error::AllocationError;
use crate::monitor::NodeMonitor;
use crate::time::timestamp_expired;
use crate::transfer::{Transfer, TransferKind};
use crate::types::*;
use crate::Priority;

mod table;


pub use table::{AllocationTable, NodeRecord};

const UNIQUE_ID_LEN: usize = 16;

/// Allocation server configuration.
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Node IDs that may be handed out.
    pub allocatable: RangeInclusive<NodeId>,
    /// Node IDs inside `allocatable` that must never be handed out.
    pub reserved: Vec<NodeId>,
    /// Longest gap between two requests of one session.
    pub session_timeout: Milliseconds<u32>,
    /// Priority of the responses.
    pub priority: Priority,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            allocatable: 1..=125,
            reserved: Vec::new(),
            session_timeout: Milliseconds(1000),
            priority: Priority::MEDIUM,
        }
    }
}

/// What an open session waits for. A session that has everything is
/// resolved immediately and never stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationStage {
    AwaitingSecondPart,
    AwaitingThirdPart,
}

#[derive(Debug)]
struct Session<C: Clock> {
    unique_id: heapless::Vec<u8, UNIQUE_ID_LEN>,
    stage: AllocationStage,
    first_seen: Timestamp<C>,
    last_request: Timestamp<C>,
    preferred_node_id: Option<NodeId>,
}

/// Centralized allocation server.
#[derive(Debug)]
pub struct AllocationServer<C: Clock> {
    node_id: NodeId,
    /// Responses go out over CAN-FD.
    fd: bool,
    config: AllocatorConfig,
    table: AllocationTable,
    /// Keyed by the fragment of the first request.
    sessions: BTreeMap<Vec<u8>, Session<C>>,
    /// Session whose prefix was echoed last.
    acknowledged: Option<Vec<u8>>,
    transfer_id: TransferId,
}

impl<C> AllocationServer<C>
where
    C: Clock,
    C::T: TryFrom<u32>,
{
    /// `node_id` is the server's own ID, used as the source of responses and
    /// never handed out. `fd` tells how responses will be sent, which decides
    /// their serialization.
    pub fn new(node_id: NodeId, fd: bool, config: AllocatorConfig, table: AllocationTable) -> Self {
        Self {
            node_id,
            fd,
            config,
            table,
            sessions: BTreeMap::new(),
            acknowledged: None,
            transfer_id: 0,
        }
    }

    pub fn table(&self) -> &AllocationTable {
        &self.table
    }

    /// Records to persist so a restarted server hands out the same IDs.
    pub fn records(&self) -> Vec<NodeRecord> {
        self.table.records()
    }

    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stage of the session opened by `first_fragment`.
    pub fn stage_of(&self, first_fragment: &[u8]) -> Option<AllocationStage> {
        self.sessions.get(first_fragment).map(|s| s.stage)
    }

    /// When the session opened by `first_fragment` saw its first request.
    pub fn session_started(&self, first_fragment: &[u8]) -> Option<Timestamp<C>> {
        self.sessions.get(first_fragment).map(|s| s.first_seen)
    }

    /// Process a received transfer.
    ///
    /// Anything that isn't an `Allocation` message is ignored. Returns the
    /// response to broadcast, if any.
    pub fn handle_transfer(
        &mut self,
        transfer: &Transfer<C>,
        monitor: &NodeMonitor<C>,
    ) -> Result<Option<Transfer<C>>, AllocationError> {
        let metadata = &transfer.metadata;
        if metadata.transfer_kind != TransferKind::Message
            || metadata.data_type_id != Allocation::DATA_TYPE_ID
        {
            return Ok(None);
        }

        let message = Allocation::decode(&transfer.payload, transfer.tail_array_optimized())?;

        match metadata.source_node_id {
            None => {
                let response = self.handle_request(metadata.timestamp, &message, monitor)?;
                Ok(Some(self.response_transfer(metadata.timestamp, &response)))
            }
            Some(source) => {
                self.observe_response(source, &message);
                Ok(None)
            }
        }
    }

    /// Drop sessions whose requester went quiet.
    pub fn update_sessions(&mut self, now: Timestamp<C>) {
        let timeout = self.config.session_timeout;
        let acknowledged = &mut self.acknowledged;
        self.sessions.retain(|key, session| {
            let expired = timestamp_expired(timeout, now, session.last_request);
            if expired {
                debug!("{}, prefix {:02x?}", AllocationError::SessionTimeout, key);
                if acknowledged.as_deref() == Some(key.as_slice()) {
                    *acknowledged = None;
                }
            }
            !expired
        });
    }

    fn handle_request(
        &mut self,
        now: Timestamp<C>,
        request: &Allocation,
        monitor: &NodeMonitor<C>,
    ) -> Result<Allocation, AllocationError> {
        let fragment = &request.unique_id[..];
        if fragment.is_empty() || fragment.len() > MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST {
            return Err(AllocationError::FragmentLength(fragment.len()));
        }
        let preferred = Some(request.node_id).filter(|id| *id != ANY_NODE_ID);

        if request.first_part_of_unique_id {
            let key = fragment.to_vec();
            if self.sessions.remove(&key).is_some() {
                debug!("allocation: restarting session for prefix {:02x?}", key);
            }

            let unique_id =
                heapless::Vec::from_slice(fragment).map_err(|_| AllocationError::FragmentLength(fragment.len()))?;
            self.sessions.insert(
                key.clone(),
                Session {
                    unique_id: unique_id.clone(),
                    stage: AllocationStage::AwaitingSecondPart,
                    first_seen: now,
                    last_request: now,
                    preferred_node_id: preferred,
                },
            );
            self.acknowledged = Some(key);

            return Ok(Allocation {
                node_id: ANY_NODE_ID,
                first_part_of_unique_id: false,
                unique_id,
            });
        }

        let key = self.acknowledged.clone().ok_or(AllocationError::NoSession)?;
        let session = self.sessions.get_mut(&key).ok_or(AllocationError::NoSession)?;

        if timestamp_expired(self.config.session_timeout, now, session.last_request) {
            self.sessions.remove(&key);
            self.acknowledged = None;
            return Err(AllocationError::SessionTimeout);
        }

        let total = session.unique_id.len() + fragment.len();
        let complete = total == UNIQUE_ID_LEN;
        // The third part has to finish the unique ID
        if total > UNIQUE_ID_LEN
            || (session.stage == AllocationStage::AwaitingThirdPart && !complete)
        {
            self.sessions.remove(&key);
            self.acknowledged = None;
            return Err(AllocationError::FragmentLength(fragment.len()));
        }

        session
            .unique_id
            .extend_from_slice(fragment)
            .map_err(|_| AllocationError::FragmentLength(fragment.len()))?;
        session.last_request = now;
        if preferred.is_some() {
            session.preferred_node_id = preferred;
        }

        if !complete {
            session.stage = AllocationStage::AwaitingThirdPart;
            return Ok(Allocation {
                node_id: ANY_NODE_ID,
                first_part_of_unique_id: false,
                unique_id: session.unique_id.clone(),
            });
        }

        let session = match self.sessions.remove(&key) {
            Some(session) => session,
            None => return Err(AllocationError::NoSession),
        };
        self.acknowledged = None;

        let mut unique_id = [0u8; UNIQUE_ID_LEN];
        unique_id.copy_from_slice(&session.unique_id);

        let node_id = self.allocate(&unique_id, session.preferred_node_id, now, monitor)?;

        Ok(Allocation {
            node_id,
            first_part_of_unique_id: false,
            unique_id: session.unique_id,
        })
    }

    /// Pick a node ID for a complete unique ID and record it.
    fn allocate(
        &mut self,
        unique_id: &UniqueId,
        preferred: Option<NodeId>,
        now: Timestamp<C>,
        monitor: &NodeMonitor<C>,
    ) -> Result<NodeId, AllocationError> {
        if let Some(node_id) = self.table.node_id_of(unique_id) {
            info!("allocation: {:02x?} already has node ID {}", unique_id, node_id);
            return Ok(node_id);
        }

        let node_id = match preferred.filter(|id| self.is_free(*id, now, monitor)) {
            Some(node_id) => node_id,
            None => {
                let start = core::cmp::max(*self.config.allocatable.start(), 1);
                let end = core::cmp::min(*self.config.allocatable.end(), MAX_NODE_ID);
                (start..=end)
                    .find(|id| self.is_free(*id, now, monitor))
                    .ok_or(AllocationError::PoolExhausted)?
            }
        };

        self.table.insert(NodeRecord {
            node_id,
            unique_id: *unique_id,
        })?;
        info!("allocation: assigned node ID {} to {:02x?}", node_id, unique_id);
        Ok(node_id)
    }

    fn is_free(&self, node_id: NodeId, now: Timestamp<C>, monitor: &NodeMonitor<C>) -> bool {
        self.config.allocatable.contains(&node_id)
            && node_id != 0
            && node_id <= MAX_NODE_ID
            && node_id != self.node_id
            && !self.config.reserved.contains(&node_id)
            && !self.table.is_allocated(node_id)
            && !monitor.is_online(node_id, now)
    }

    /// Another allocator's final response. Keep our table in line with it.
    fn observe_response(&mut self, source: NodeId, response: &Allocation) {
        if response.node_id == ANY_NODE_ID || response.unique_id.len() != UNIQUE_ID_LEN {
            return;
        }

        let mut unique_id = [0u8; UNIQUE_ID_LEN];
        unique_id.copy_from_slice(&response.unique_id);
        match self.table.insert(NodeRecord {
            node_id: response.node_id,
            unique_id,
        }) {
            Ok(()) => debug!(
                "allocation: node {} reported node ID {} for {:02x?}",
                source, response.node_id, unique_id
            ),
            Err(e) => warn!("allocation: node {} disagrees with our table: {}", source, e),
        }
    }

    fn response_transfer(&mut self, timestamp: Timestamp<C>, response: &Allocation) -> Transfer<C> {
        let transfer = Transfer::message(
            timestamp,
            self.config.priority,
            Allocation::DATA_TYPE_ID,
            self.transfer_id,
            response.encode(!self.fd),
        )
        .with_fd(self.fd);
        self.transfer_id = next_transfer_id(self.transfer_id);
        transfer
    }
}
