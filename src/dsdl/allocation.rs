//! `uavcan.protocol.dynamic_node_id.Allocation`
//!
//! Sent anonymously by nodes looking for a node ID, and by allocators in
//! reply. A request carries at most [`MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST`]
//! bytes of the unique ID, so the full 16 bytes take three rounds.

use alloc::vec::Vec;

use super::bits::{BitReader, BitWriter};
use super::DataType;
use crate::types::{DataTypeId, NodeId};
use crate::DecodeError;

pub const MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST: usize = 6;
/// Node ID value meaning "no preference" in requests and "not yet" in
/// intermediate responses.
pub const ANY_NODE_ID: NodeId = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    pub node_id: NodeId,
    pub first_part_of_unique_id: bool,
    pub unique_id: heapless::Vec<u8, 16>,
}

impl Allocation {
    /// Returns `None` if `unique_id` is longer than 16 bytes.
    pub fn new(node_id: NodeId, first_part_of_unique_id: bool, unique_id: &[u8]) -> Option<Self> {
        Some(Self {
            node_id,
            first_part_of_unique_id,
            unique_id: heapless::Vec::from_slice(unique_id).ok()?,
        })
    }
}

impl DataType for Allocation {
    const DATA_TYPE_ID: DataTypeId = 1;
    const SIGNATURE: u64 = 0x0B2A812620A11D40;
    const MAX_SIZE: usize = 18;

    fn decode(payload: &[u8], tao: bool) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(payload);
        let node_id = r.read_u8(7)?;
        let first_part_of_unique_id = r.read_bool()?;

        let len = r.tail_array_len(tao, 5, 8, 16)?;
        let mut unique_id = heapless::Vec::new();
        for _ in 0..len {
            unique_id
                .push(r.read_u8(8)?)
                .map_err(|_| DecodeError::ArrayTooLong { len, max: 16 })?;
        }

        Ok(Self {
            node_id,
            first_part_of_unique_id,
            unique_id,
        })
    }

    fn encode(&self, tao: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_unsigned(self.node_id as u64, 7);
        w.write_bool(self.first_part_of_unique_id);
        w.write_tail_array_len(tao, self.unique_id.len(), 5);
        for byte in &self.unique_id {
            w.write_unsigned(*byte as u64, 8);
        }
        w.into_bytes()
    }
}
