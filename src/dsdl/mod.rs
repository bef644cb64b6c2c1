//! Decoding of the DroneCAN data types a GNSS receiver puts on the bus.
//!
//! Only a handful of types are known here. Anything else comes out as
//! [`DecodedMessage::Unknown`], since a shared bus always carries traffic we
//! have no business understanding.

use alloc::vec::Vec;

use embedded_time::Clock;

use crate::session::Subscription;
use crate::transfer::Transfer;
use crate::transport::can::FD_MTU;
use crate::types::DataTypeId;
use crate::DecodeError;

pub mod allocation;
pub mod bits;
pub mod gnss;
pub mod node_status;

pub use allocation::Allocation;
pub use gnss::{Auxiliary, Fix, Fix2};
pub use node_status::NodeStatus;

/// A fixed-layout DSDL data type.
///
/// `tao` selects tail array optimization, which drops the length prefix of
/// the last dynamic array. It is on for classic CAN and off for CAN-FD.
pub trait DataType: Sized {
    const DATA_TYPE_ID: DataTypeId;
    /// Seeds the transfer CRC of multi-frame transfers.
    const SIGNATURE: u64;
    /// Largest serialized size, in bytes.
    const MAX_SIZE: usize;

    fn decode(payload: &[u8], tao: bool) -> Result<Self, DecodeError>;
    fn encode(&self, tao: bool) -> Vec<u8>;

    /// Subscription accepting the largest payload, plus CAN-FD padding.
    fn subscription() -> Subscription {
        Subscription::message(Self::DATA_TYPE_ID, Self::SIGNATURE, Self::MAX_SIZE + FD_MTU)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedMessage {
    NodeStatus(NodeStatus),
    Fix(Fix),
    Fix2(Fix2),
    Auxiliary(Auxiliary),
    Allocation(Allocation),
    Unknown { data_type_id: DataTypeId },
}

/// Decode a message payload by its full data type ID.
///
/// Unknown IDs are not an error. A known ID with a payload that doesn't fit
/// its layout is.
pub fn decode(data_type_id: DataTypeId, payload: &[u8], tao: bool) -> Result<DecodedMessage, DecodeError> {
    Ok(match data_type_id {
        NodeStatus::DATA_TYPE_ID => DecodedMessage::NodeStatus(NodeStatus::decode(payload, tao)?),
        Fix::DATA_TYPE_ID => DecodedMessage::Fix(Fix::decode(payload, tao)?),
        Fix2::DATA_TYPE_ID => DecodedMessage::Fix2(Fix2::decode(payload, tao)?),
        Auxiliary::DATA_TYPE_ID => DecodedMessage::Auxiliary(Auxiliary::decode(payload, tao)?),
        Allocation::DATA_TYPE_ID => DecodedMessage::Allocation(Allocation::decode(payload, tao)?),
        data_type_id => DecodedMessage::Unknown { data_type_id },
    })
}

/// Decode a received message transfer.
///
/// An anonymous transfer only carries the low two bits of its data type ID.
/// `Allocation` is the one anonymous type known here, anything else sent
/// anonymously is reported as unknown under those two bits.
pub fn decode_transfer<C: Clock>(transfer: &Transfer<C>) -> Result<DecodedMessage, DecodeError> {
    let metadata = &transfer.metadata;
    let tao = transfer.tail_array_optimized();
    if transfer.is_anonymous() {
        return Ok(match metadata.data_type_id & ANONYMOUS_TYPE_ID_MASK {
            id if id == Allocation::DATA_TYPE_ID & ANONYMOUS_TYPE_ID_MASK => {
                DecodedMessage::Allocation(Allocation::decode(&transfer.payload, tao)?)
            }
            data_type_id => DecodedMessage::Unknown { data_type_id },
        });
    }
    decode(metadata.data_type_id, &transfer.payload, tao)
}

/// Bits of the data type ID an anonymous CAN ID has room for.
pub const ANONYMOUS_TYPE_ID_MASK: DataTypeId = 0b11;

/// Data type signature of the known message types.
pub fn signature_of(data_type_id: DataTypeId) -> Option<u64> {
    match data_type_id {
        NodeStatus::DATA_TYPE_ID => Some(NodeStatus::SIGNATURE),
        Fix::DATA_TYPE_ID => Some(Fix::SIGNATURE),
        Fix2::DATA_TYPE_ID => Some(Fix2::SIGNATURE),
        Auxiliary::DATA_TYPE_ID => Some(Auxiliary::SIGNATURE),
        Allocation::DATA_TYPE_ID => Some(Allocation::SIGNATURE),
        _ => None,
    }
}

/// Subscriptions for every known message type.
pub fn subscriptions() -> [Subscription; 5] {
    [
        NodeStatus::subscription(),
        Fix::subscription(),
        Fix2::subscription(),
        Auxiliary::subscription(),
        Allocation::subscription(),
    ]
}
