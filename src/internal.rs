//! Internal types for passing data around. Overly verbose
//! and not useful to the user.

use embedded_time::Clock;

use crate::transfer::TransferKind;
use crate::types::*;
use crate::Priority;

/// Internal representation of a received frame, after the CAN ID and tail
/// byte have been decoded.
///
/// This is public so externally-defined SessionManagers can use it.
#[derive(Debug)]
pub struct InternalRxFrame<'a, C: Clock> {
    pub timestamp: Timestamp<C>,
    pub priority: Priority,
    pub transfer_kind: TransferKind,
    pub data_type_id: DataTypeId,
    pub source_node_id: Option<NodeId>,
    pub destination_node_id: Option<NodeId>,
    pub transfer_id: TransferId,
    pub start_of_transfer: bool,
    pub end_of_transfer: bool,
    pub toggle: bool,
    /// Arrived in a CAN-FD frame.
    pub fd: bool,
    /// Frame data with the tail byte stripped.
    pub payload: &'a [u8],
}

impl<'a, C: Clock> InternalRxFrame<'a, C> {
    /// Construct internal frame as a message type
    #[allow(clippy::too_many_arguments)]
    pub fn as_message(
        timestamp: Timestamp<C>,
        priority: Priority,
        data_type_id: DataTypeId,
        source_node_id: Option<NodeId>,
        tail: crate::transport::can::TailByte,
        fd: bool,
        payload: &'a [u8],
    ) -> Self {
        Self {
            timestamp,
            priority,
            transfer_kind: TransferKind::Message,
            data_type_id,
            source_node_id,
            destination_node_id: None,
            transfer_id: tail.transfer_id(),
            start_of_transfer: tail.start_of_transfer(),
            end_of_transfer: tail.end_of_transfer(),
            toggle: tail.toggle(),
            fd,
            payload,
        }
    }

    /// Construct internal frame as a service type
    #[allow(clippy::too_many_arguments)]
    pub fn as_service(
        timestamp: Timestamp<C>,
        priority: Priority,
        transfer_kind: TransferKind,
        data_type_id: DataTypeId,
        source_node_id: NodeId,
        destination_node_id: NodeId,
        tail: crate::transport::can::TailByte,
        fd: bool,
        payload: &'a [u8],
    ) -> Self {
        Self {
            timestamp,
            priority,
            transfer_kind,
            data_type_id,
            source_node_id: Some(source_node_id),
            destination_node_id: Some(destination_node_id),
            transfer_id: tail.transfer_id(),
            start_of_transfer: tail.start_of_transfer(),
            end_of_transfer: tail.end_of_transfer(),
            toggle: tail.toggle(),
            fd,
            payload,
        }
    }

    pub fn is_single_frame(&self) -> bool {
        self.start_of_transfer && self.end_of_transfer
    }
}
