//! Transport-specific functionality.
//!
//! DroneCAN only runs over CAN and CAN-FD, both handled by [`can`]. Everything
//! above this module works on [`crate::internal::InternalRxFrame`] and
//! [`crate::transfer::Transfer`] and never sees a raw frame.

pub mod can;
