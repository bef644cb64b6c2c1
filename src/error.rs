use thiserror::Error;

use crate::types::NodeId;

/// Errors while turning frames into transfers.
///
/// None of these are fatal. A noisy or half-populated bus produces them all the
/// time, the node logs and counts them and moves on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RxError {
    #[error("rx: malformed CAN ID {0:#010x}")]
    MalformedId(u32),

    #[error("rx: frame has no tail byte")]
    FrameEmpty,

    #[error("rx: frame of {len} bytes exceeds MTU of {mtu}")]
    FrameTooLong { len: usize, mtu: usize },

    #[error("rx: non-last frame does not fill the MTU")]
    NonLastUnderUtilization,

    #[error("rx: anonymous transfer spans multiple frames")]
    AnonNotSingleFrame,

    #[error("rx: toggle bit out of sequence")]
    ToggleViolation,

    #[error("rx: continuation frame without start of transfer")]
    MissingStartOfTransfer,

    #[error("rx: transfer payload exceeds extent of {extent} bytes")]
    PayloadTooLarge { extent: usize },

    #[error("rx: transfer timed out before completion")]
    SessionTimeout,

    #[error("rx: transfer CRC mismatch (expected {expected:#06x}, computed {computed:#06x})")]
    CrcMismatch { expected: u16, computed: u16 },
}

/// Errors while splitting a transfer into frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("tx: anonymous transfers must fit a single frame")]
    AnonNotSingleFrame,

    #[error("tx: service transfer without source node ID")]
    ServiceNoSourceID,

    #[error("tx: service transfer without destination node ID")]
    ServiceNoDestinationID,

    #[error("tx: invalid node ID {0}")]
    InvalidNodeId(NodeId),

    #[error("tx: queue of {capacity} frames is full")]
    QueueFull { capacity: usize },
}

/// Errors while decoding a DSDL payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("decode: payload truncated, needed {needed} bits with {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("decode: array length {len} exceeds capacity {max}")]
    ArrayTooLong { len: usize, max: usize },
}

/// Errors from the dynamic node ID allocation server.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("allocation: bad request: {0}")]
    Decode(#[from] DecodeError),

    #[error("allocation: unique ID fragment of {0} bytes is not acceptable")]
    FragmentLength(usize),

    #[error("allocation: follow-up request without a matching session")]
    NoSession,

    #[error("allocation: session timed out")]
    SessionTimeout,

    #[error("allocation: node ID {node_id} is already bound to another unique ID")]
    UniqueIdConflict { node_id: NodeId },

    #[error("allocation: no free node ID left in the allocatable range")]
    PoolExhausted,
}

impl AllocationError {
    /// Whether the condition points at configuration rather than bus noise and
    /// should reach whoever runs the node.
    pub fn is_reportable(&self) -> bool {
        matches!(self, AllocationError::PoolExhausted)
    }
}

/// Errors surfaced by [`crate::Node`]. Everything else is recovered locally.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node: {0}")]
    Allocation(#[from] AllocationError),
}

pub type NodeResult<T> = Result<T, NodeError>;
