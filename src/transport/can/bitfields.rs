//! # UAVCAN v0 CAN bitfield primitives.
//!
//! These types describe the bit patterns of both the CAN ID and tail bytes.
//! As well as providing convenient constructor/accessor functions these types
//! are able to do some of the more basic checks that they are valid.

use bitfield::bitfield;
use embedded_hal::can::ExtendedId;

use crate::transfer::TransferKind;
use crate::types::*;
use crate::{Priority, RxError};

bitfield! {
    /// Structure declaring bitfields of a message frame.
    #[derive(Copy, Clone, Debug)]
    pub struct CanMessageId(u32);
    /// Priority level.
    pub u8, priority, set_priority: 28, 24;
    /// Data type ID of the message being sent.
    pub u16, type_id, set_type_id: 23, 8;
    /// Is this a service?
    pub bool, is_svc, set_svc: 7;
    /// Node ID of the message's source. 0 for anonymous messages.
    pub u8, source_id, set_source_id: 6, 0;
}

impl CanMessageId {
    pub fn new(priority: Priority, type_id: DataTypeId, source_id: NodeId) -> u32 {
        let mut id = CanMessageId(0);
        id.set_priority(priority.level());
        id.set_type_id(type_id);
        id.set_svc(false);
        id.set_source_id(source_id);
        id.0
    }

    pub fn is_anon(&self) -> bool {
        self.source_id() == 0
    }
}

bitfield! {
    /// Message frame sent by a node without a node ID. The upper bits of the
    /// data type ID are replaced by a discriminator so that anonymous nodes
    /// sending different payloads don't collide during arbitration.
    #[derive(Copy, Clone, Debug)]
    pub struct CanAnonymousId(u32);
    /// Priority level.
    pub u8, priority, set_priority: 28, 24;
    /// Derived from the payload CRC.
    pub u16, discriminator, set_discriminator: 23, 10;
    /// Lowest two bits of the data type ID.
    pub u16, type_id, set_type_id: 9, 8;
    /// Is this a service?
    pub bool, is_svc, set_svc: 7;
    /// Always 0.
    pub u8, source_id, set_source_id: 6, 0;
}

impl CanAnonymousId {
    pub fn new(priority: Priority, type_id: DataTypeId, discriminator: u16) -> u32 {
        let mut id = CanAnonymousId(0);
        id.set_priority(priority.level());
        id.set_discriminator(discriminator & 0x3fff);
        id.set_type_id(type_id & 0x3);
        id.set_svc(false);
        id.set_source_id(0);
        id.0
    }

    /// Discriminator for a payload, computed the way libcanard does it.
    pub fn discriminator_for(payload: &[u8]) -> u16 {
        let mut crc = crate::crc16::Crc16::init();
        crc.digest(payload);
        (crc.get_crc() & 0x7ffe) >> 1
    }
}

bitfield! {
    /// Structure declaring bitfields of a service frame.
    #[derive(Copy, Clone, Debug)]
    pub struct CanServiceId(u32);
    /// Priority level.
    pub u8, priority, set_priority: 28, 24;
    /// Service type ID.
    pub u8, type_id, set_type_id: 23, 16;
    /// Is this a request? (or a response?)
    pub bool, is_req, set_req: 15;
    /// Destination node ID
    pub u8, destination_id, set_destination_id: 14, 8;
    /// Is this a service?
    pub bool, is_svc, set_svc: 7;
    /// Source node ID
    pub u8, source_id, set_source_id: 6, 0;
}

impl CanServiceId {
    pub fn new(
        priority: Priority,
        is_request: bool,
        type_id: u8,
        destination: NodeId,
        source: NodeId,
    ) -> u32 {
        let mut id = CanServiceId(0);
        id.set_priority(priority.level());
        id.set_type_id(type_id);
        id.set_req(is_request);
        id.set_destination_id(destination);
        id.set_svc(true);
        id.set_source_id(source);
        id.0
    }
}

bitfield! {
    /// Tail byte of frame data. Received at end of every frame.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct TailByte(u8);
    /// Is this the start of the transfer?
    pub bool, start_of_transfer, set_start_of_transfer: 7;
    /// Is this the end of the transfer?
    pub bool, end_of_transfer, set_end_of_transfer: 6;
    /// Toggle bit to ensure frames are received in order. Starts at 0.
    pub bool, toggle, set_toggle: 5;
    /// Transfer ID to ensure the correct frames are being received.
    pub u8, transfer_id, set_transfer_id: 4, 0;
}

impl TailByte {
    pub fn new(is_start: bool, is_end: bool, toggle: bool, transfer_id: TransferId) -> u8 {
        let mut byte = TailByte(0);
        byte.set_start_of_transfer(is_start);
        byte.set_end_of_transfer(is_end);
        byte.set_toggle(toggle);
        byte.set_transfer_id(transfer_id & TRANSFER_ID_MASK);
        byte.0
    }
}

impl From<u8> for TailByte {
    fn from(byte: u8) -> Self {
        TailByte(byte)
    }
}

/// Decoded CAN ID, independent of which of the three layouts it came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub priority: Priority,
    pub transfer_kind: TransferKind,
    /// Full data type ID for messages and services, only the two lowest bits
    /// for anonymous messages.
    pub data_type_id: DataTypeId,
    /// `None` for anonymous messages.
    pub source_node_id: Option<NodeId>,
    /// Only set for services.
    pub destination_node_id: Option<NodeId>,
    /// Only nonzero for anonymous messages.
    pub discriminator: u16,
}

impl FrameHeader {
    /// Decode a raw 29-bit CAN ID.
    ///
    /// Rejects IDs with bits set above bit 28, and service IDs with a zero
    /// source or destination.
    pub fn decode(raw: u32) -> Result<Self, RxError> {
        let raw = ExtendedId::new(raw).ok_or(RxError::MalformedId(raw))?.as_raw();

        if CanServiceId(raw).is_svc() {
            let id = CanServiceId(raw);
            if id.source_id() == 0 || id.destination_id() == 0 {
                return Err(RxError::MalformedId(raw));
            }

            let transfer_kind = if id.is_req() {
                TransferKind::Request
            } else {
                TransferKind::Response
            };

            return Ok(Self {
                priority: Priority::from_bits(id.priority()),
                transfer_kind,
                data_type_id: id.type_id() as DataTypeId,
                source_node_id: Some(id.source_id()),
                destination_node_id: Some(id.destination_id()),
                discriminator: 0,
            });
        }

        let id = CanMessageId(raw);
        if id.is_anon() {
            let id = CanAnonymousId(raw);
            Ok(Self {
                priority: Priority::from_bits(id.priority()),
                transfer_kind: TransferKind::Message,
                data_type_id: id.type_id(),
                source_node_id: None,
                destination_node_id: None,
                discriminator: id.discriminator(),
            })
        } else {
            Ok(Self {
                priority: Priority::from_bits(id.priority()),
                transfer_kind: TransferKind::Message,
                data_type_id: id.type_id(),
                source_node_id: Some(id.source_id()),
                destination_node_id: None,
                discriminator: 0,
            })
        }
    }

    /// Inverse of [`FrameHeader::decode`].
    pub fn encode(&self) -> u32 {
        match self.transfer_kind {
            TransferKind::Message => match self.source_node_id {
                Some(source) => CanMessageId::new(self.priority, self.data_type_id, source),
                None => CanAnonymousId::new(self.priority, self.data_type_id, self.discriminator),
            },
            TransferKind::Request | TransferKind::Response => CanServiceId::new(
                self.priority,
                self.transfer_kind == TransferKind::Request,
                self.data_type_id as u8,
                self.destination_node_id.unwrap_or(0),
                self.source_node_id.unwrap_or(0),
            ),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.transfer_kind == TransferKind::Message && self.source_node_id.is_none()
    }
}
