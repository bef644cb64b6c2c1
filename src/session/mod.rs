//! Session management.
//!
//! UAVCAN defines a session as an identifier of a collection of transfers
//! between a given set of agents. A session manager turns the frames of
//! in-flight transfers into complete [`Transfer`]s. The crate ships
//! [`TransferReassembler`], a heap-based manager that tracks any number of
//! interleaved transfers, and a library user can implement their own
//! through the [`SessionManager`] trait.

use embedded_time::Clock;

use crate::internal::InternalRxFrame;
use crate::transfer::{Transfer, TransferKind};
use crate::types::*;
use crate::RxError;

mod reassembler;

pub use reassembler::{SlotKey, TransferReassembler};

/// Describes a data type the node wants to receive.
///
/// Multi-frame transfers can only be checked against their CRC once the data
/// type signature is known, so only subscribed types are reassembled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub transfer_kind: TransferKind,
    pub data_type_id: DataTypeId,
    pub data_type_signature: u64,
    /// Largest payload accepted, in bytes.
    pub extent: usize,
}

impl Subscription {
    pub const fn message(data_type_id: DataTypeId, data_type_signature: u64, extent: usize) -> Self {
        Self {
            transfer_kind: TransferKind::Message,
            data_type_id,
            data_type_signature,
            extent,
        }
    }
}

/// Trait to declare a session manager. This is responsible for managing
/// subscriptions and ongoing sessions.
///
/// The intent here is to provide an interface to easily define
/// what management strategy you want to implement. This allows you to
/// select different models based on e.g. your memory allocation strategy.
pub trait SessionManager<C: Clock> {
    /// Process incoming frame.
    ///
    /// Returns the transfer once its last frame has been accepted.
    fn ingest(&mut self, frame: InternalRxFrame<C>) -> Result<Option<Transfer<C>>, RxError>;

    /// Housekeeping function called to clean up timed-out sessions.
    fn update_sessions(&mut self, timestamp: Timestamp<C>);

    /// Helper function to match frames to the correct subscription.
    fn matches_sub(subscription: &Subscription, frame: &InternalRxFrame<C>) -> bool {
        // Order is chosen to short circuit the most common inconsistencies.
        if frame.data_type_id != subscription.data_type_id {
            return false;
        }
        if frame.transfer_kind != subscription.transfer_kind {
            return false;
        }

        true
    }
}
