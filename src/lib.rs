//! DroneCAN (UAVCAN v0) ingestion core for Here4-class GNSS receivers.
//!
//! The crate turns raw CAN/CAN-FD frames into complete transfers, runs a dynamic
//! node ID allocation server for anonymous nodes, and decodes the handful of
//! message types a GNSS receiver puts on the bus (NodeStatus, Fix, Fix2,
//! Auxiliary).
//!
//! Bus I/O is not handled here. Feed received frames into [`Node::receive_frame`],
//! call [`Node::update`] periodically for housekeeping, and drain frames to
//! transmit with [`Node::pop_frame`].
//!
//! Layering, leaf-first:
//! - [`transport::can`]: CAN ID and tail byte codec, frame generation.
//! - [`session`]: transfer reassembly (toggle, CRC, timeouts).
//! - [`allocator`]: dynamic node ID allocation server.
//! - [`dsdl`]: bit-level message decoding.
//! - [`node`]: the pipeline tying the above together.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod allocator;
pub mod crc16;
pub mod dsdl;
pub mod error;
pub mod internal;
pub mod monitor;
pub mod node;
pub mod session;
pub mod time;
pub mod transfer;
pub mod transport;
pub mod types;

pub use error::{AllocationError, DecodeError, NodeError, RxError, TxError};
pub use node::{Event, EventSink, Node, NodeConfig, Statistics};
pub use transfer::{Transfer, TransferKind, TransferMetadata};

/// Transfer priority.
///
/// UAVCAN v0 uses 5 bits of priority at the top of the CAN ID, so there are 32
/// levels with 0 being the highest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const HIGH: Priority = Priority(8);
    pub const MEDIUM: Priority = Priority(16);
    pub const LOW: Priority = Priority(24);
    pub const LOWEST: Priority = Priority(31);

    /// Returns `None` if the level doesn't fit in 5 bits.
    pub fn new(level: u8) -> Option<Self> {
        if level <= Self::LOWEST.0 {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Build from the raw ID field, ignoring anything above 5 bits.
    pub(crate) fn from_bits(bits: u8) -> Self {
        Self(bits & 0x1f)
    }

    pub fn level(self) -> u8 {
        self.0
    }
}
