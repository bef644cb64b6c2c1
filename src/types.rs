//! # Basic protocol-level types shared across the crate.

/// Node ID. 1..=127 are valid node IDs; 0 marks an anonymous node.
pub type NodeId = u8;

/// Data type ID. 16 bits for messages, 8 bits for services, 2 bits for
/// anonymous messages.
pub type DataTypeId = u16;

/// Transfer ID, 5 bits, wrapping.
pub type TransferId = u8;

/// Monotonic timestamp from any `embedded_time` clock.
pub type Timestamp<C> = embedded_time::Instant<C>;

/// 128-bit hardware identifier of a node, used by dynamic node ID allocation.
pub type UniqueId = [u8; 16];

/// Highest valid node ID.
pub const MAX_NODE_ID: NodeId = 127;

/// Mask of the 5 bit transfer ID.
pub const TRANSFER_ID_MASK: TransferId = 0x1f;

/// Increment a transfer ID, wrapping at 5 bits.
pub fn next_transfer_id(transfer_id: TransferId) -> TransferId {
    transfer_id.wrapping_add(1) & TRANSFER_ID_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_id_wraps_at_five_bits() {
        assert_eq!(next_transfer_id(0), 1);
        assert_eq!(next_transfer_id(30), 31);
        assert_eq!(next_transfer_id(31), 0);
    }
}
