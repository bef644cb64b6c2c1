//! This module describes the transport-agnostic concept of a transfer,
//! which boils down to some metadata to uniquely identify it, as well
//! as a serialized buffer of data, which encodes DSDL-based data.

use alloc::vec::Vec;

use embedded_time::Clock;

use crate::internal::InternalRxFrame;
use crate::types::*;
use crate::Priority;

/// Protocol-level transfer types.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum TransferKind {
    Message,
    Response,
    Request,
}

#[derive(Debug)]
pub struct TransferMetadata<C: Clock> {
    /// Timestamp of the first frame on reception, creation time on transmission.
    pub timestamp: Timestamp<C>,
    pub priority: Priority,
    pub transfer_kind: TransferKind,
    pub data_type_id: DataTypeId,
    /// `None` for anonymous transfers. Ignored on transmission, where the
    /// local node ID is used instead.
    pub source_node_id: Option<NodeId>,
    /// Only set for service transfers.
    pub destination_node_id: Option<NodeId>,
    pub transfer_id: TransferId,
    /// Payload serialized for CAN-FD, i.e. without tail array optimization.
    /// Set from the frames on reception.
    pub fd: bool,
}

// Derive would require C: Clone.
impl<C: Clock> Clone for TransferMetadata<C> {
    fn clone(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            priority: self.priority,
            transfer_kind: self.transfer_kind,
            data_type_id: self.data_type_id,
            source_node_id: self.source_node_id,
            destination_node_id: self.destination_node_id,
            transfer_id: self.transfer_id,
            fd: self.fd,
        }
    }
}

/// Application representation of a UAVCAN transfer.
///
/// This will be passed out on successful reception of full transfers,
/// as well as given to the transport to be split into frames.
#[derive(Debug)]
pub struct Transfer<C: Clock> {
    pub metadata: TransferMetadata<C>,
    pub payload: Vec<u8>,
}

impl<C: Clock> Clone for Transfer<C> {
    fn clone(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            payload: self.payload.clone(),
        }
    }
}

// I don't want to impl convert::From because I need to pull in extra data
impl<C: Clock> Transfer<C> {
    pub fn from_frame(frame: &InternalRxFrame<C>, timestamp: Timestamp<C>, payload: Vec<u8>) -> Self {
        Self {
            metadata: TransferMetadata {
                timestamp,
                priority: frame.priority,
                transfer_kind: frame.transfer_kind,
                data_type_id: frame.data_type_id,
                source_node_id: frame.source_node_id,
                destination_node_id: frame.destination_node_id,
                transfer_id: frame.transfer_id,
                fd: frame.fd,
            },
            payload,
        }
    }

    /// Broadcast message transfer.
    pub fn message(
        timestamp: Timestamp<C>,
        priority: Priority,
        data_type_id: DataTypeId,
        transfer_id: TransferId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            metadata: TransferMetadata {
                timestamp,
                priority,
                transfer_kind: TransferKind::Message,
                data_type_id,
                source_node_id: None,
                destination_node_id: None,
                transfer_id,
                fd: false,
            },
            payload,
        }
    }

    /// Mark the payload as serialized for CAN-FD or classic CAN.
    pub fn with_fd(mut self, fd: bool) -> Self {
        self.metadata.fd = fd;
        self
    }

    /// Whether the payload leaves out the length of its last dynamic array.
    /// DroneCAN does this on classic CAN only.
    pub fn tail_array_optimized(&self) -> bool {
        !self.metadata.fd
    }

    pub fn is_anonymous(&self) -> bool {
        self.metadata.transfer_kind == TransferKind::Message && self.metadata.source_node_id.is_none()
    }
}
