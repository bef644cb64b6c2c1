//! UAVCAN v0 CAN and CAN-FD transport.
//!
//! Received frames are validated and decoded into [`InternalRxFrame`]s with
//! [`Can::rx_process_frame`]. Outgoing transfers are split into frames by
//! [`Can::transmit`], which hands back a [`TransferIter`].

use arrayvec::ArrayVec;
use embedded_hal::can::{ExtendedId, Frame, Id};
use embedded_time::Clock;
use streaming_iterator::StreamingIterator;

use crate::crc16::Crc16;
use crate::internal::InternalRxFrame;
use crate::transfer::{Transfer, TransferKind};
use crate::types::*;
use crate::{RxError, TxError};

mod bitfields;


pub use bitfields::*;

/// Frame size of classic CAN 2.0B.
pub const CLASSIC_MTU: usize = 8;
/// Frame size of CAN-FD.
pub const FD_MTU: usize = 64;

/// Payload lengths a CAN-FD DLC can express.
const FD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Smallest CAN-FD frame length that fits `len` bytes.
pub fn fd_padded_len(len: usize) -> usize {
    FD_LENGTHS
        .iter()
        .copied()
        .find(|l| *l >= len)
        .unwrap_or(FD_MTU)
}

/// Extended CAN frame (the only one supported by UAVCAN/CAN), classic or FD.
#[derive(Debug)]
pub struct CanFrame<C: Clock> {
    pub timestamp: Timestamp<C>,
    /// Raw 29-bit identifier. Kept raw so malformed IDs can be reported.
    pub id: u32,
    pub fd: bool,
    pub payload: ArrayVec<[u8; 64]>,
}

impl<C: Clock> Clone for CanFrame<C> {
    fn clone(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            id: self.id,
            fd: self.fd,
            payload: self.payload.clone(),
        }
    }
}

impl<C: Clock> CanFrame<C> {
    /// Returns `None` if the data doesn't fit a CAN-FD frame.
    pub fn new(timestamp: Timestamp<C>, id: u32, fd: bool, data: &[u8]) -> Option<Self> {
        let mut payload = ArrayVec::new();
        payload.try_extend_from_slice(data).ok()?;
        Some(Self {
            timestamp,
            id,
            fd,
            payload,
        })
    }

    /// Convert a frame received through an `embedded-hal` driver.
    ///
    /// Standard-ID and remote frames can't carry UAVCAN traffic and yield `None`.
    pub fn from_hal<F: Frame>(timestamp: Timestamp<C>, frame: &F) -> Option<Self> {
        if frame.is_remote_frame() {
            return None;
        }
        match frame.id() {
            Id::Extended(id) => Self::new(timestamp, id.as_raw(), false, frame.data()),
            Id::Standard(_) => None,
        }
    }

    /// Convert into a classic `embedded-hal` frame for transmission.
    ///
    /// Returns `None` for FD frames longer than 8 bytes.
    pub fn to_hal<F: Frame>(&self) -> Option<F> {
        F::new(ExtendedId::new(self.id)?, &self.payload)
    }

    pub fn mtu(&self) -> usize {
        if self.fd {
            FD_MTU
        } else {
            CLASSIC_MTU
        }
    }

    pub fn tail_byte(&self) -> Option<TailByte> {
        self.payload.last().copied().map(TailByte)
    }
}

/// Unit struct for declaring transport type
#[derive(Copy, Clone, Debug)]
pub struct Can;

impl Can {
    /// Process a frame, returning the internal transport-independent
    /// representation, or errors if invalid.
    ///
    /// Service frames addressed to another node yield `Ok(None)`.
    pub fn rx_process_frame<'a, C: Clock>(
        node_id: Option<NodeId>,
        frame: &'a CanFrame<C>,
    ) -> Result<Option<InternalRxFrame<'a, C>>, RxError> {
        // Frames cannot be empty. They must at least have a tail byte.
        let tail_byte = frame.tail_byte().ok_or(RxError::FrameEmpty)?;

        if frame.payload.len() > frame.mtu() {
            return Err(RxError::FrameTooLong {
                len: frame.payload.len(),
                mtu: frame.mtu(),
            });
        }

        let header = FrameHeader::decode(frame.id)?;

        // Toggle starts at 0 in UAVCAN v0
        if tail_byte.start_of_transfer() && tail_byte.toggle() {
            return Err(RxError::ToggleViolation);
        }
        // Non-last frames must use the MTU fully
        if !tail_byte.end_of_transfer() && frame.payload.len() < frame.mtu() {
            return Err(RxError::NonLastUnderUtilization);
        }

        let data = &frame.payload[..frame.payload.len() - 1];

        match header.transfer_kind {
            TransferKind::Request | TransferKind::Response => {
                let (source, destination) =
                    match (header.source_node_id, header.destination_node_id) {
                        (Some(source), Some(destination)) => (source, destination),
                        _ => return Err(RxError::MalformedId(frame.id)),
                    };

                // Ignore frames not meant for us
                if node_id != Some(destination) {
                    return Ok(None);
                }

                Ok(Some(InternalRxFrame::as_service(
                    frame.timestamp,
                    header.priority,
                    header.transfer_kind,
                    header.data_type_id,
                    source,
                    destination,
                    tail_byte,
                    frame.fd,
                    data,
                )))
            }
            TransferKind::Message => {
                // Anonymous transfers can only be single-frame transfers
                if header.is_anonymous()
                    && !(tail_byte.start_of_transfer() && tail_byte.end_of_transfer())
                {
                    return Err(RxError::AnonNotSingleFrame);
                }

                Ok(Some(InternalRxFrame::as_message(
                    frame.timestamp,
                    header.priority,
                    header.data_type_id,
                    header.source_node_id,
                    tail_byte,
                    frame.fd,
                    data,
                )))
            }
        }
    }

    /// Prepare an iterator of frames to send out on the wire.
    ///
    /// `node_id` of `None` sends anonymously, which is only allowed for
    /// single-frame messages. `data_type_signature` seeds the transfer CRC of
    /// multi-frame transfers.
    pub fn transmit<C: Clock>(
        transfer: &Transfer<C>,
        node_id: Option<NodeId>,
        data_type_signature: u64,
        fd: bool,
    ) -> Result<TransferIter<'_, C>, TxError> {
        TransferIter::new(transfer, node_id, data_type_signature, fd)
    }
}

/// Iterator type to transmit a transfer.
///
/// By splitting transmission into an iterator the caller can queue the frames,
/// hand them to a driver one by one, or just collect them, without committing
/// to any memory model here.
#[derive(Debug)]
pub struct TransferIter<'a, C: Clock> {
    transfer: &'a Transfer<C>,
    frame_id: u32,
    fd: bool,
    /// Little-endian transfer CRC, only for multi-frame transfers.
    crc: Option<[u8; 2]>,
    /// Position in the CRC-prefixed stream.
    offset: usize,
    toggle: bool,
    is_start: bool,
    can_frame: Option<CanFrame<C>>,
}

impl<'a, C: Clock> TransferIter<'a, C> {
    pub fn new(
        transfer: &'a Transfer<C>,
        node_id: Option<NodeId>,
        data_type_signature: u64,
        fd: bool,
    ) -> Result<Self, TxError> {
        let metadata = &transfer.metadata;
        let mtu = if fd { FD_MTU } else { CLASSIC_MTU };
        let single_frame = transfer.payload.len() < mtu;

        if let Some(id) = node_id {
            if id == 0 || id > MAX_NODE_ID {
                return Err(TxError::InvalidNodeId(id));
            }
        }

        let header = match metadata.transfer_kind {
            TransferKind::Message => {
                if node_id.is_none() && !single_frame {
                    return Err(TxError::AnonNotSingleFrame);
                }
                FrameHeader {
                    priority: metadata.priority,
                    transfer_kind: TransferKind::Message,
                    data_type_id: metadata.data_type_id,
                    source_node_id: node_id,
                    destination_node_id: None,
                    discriminator: CanAnonymousId::discriminator_for(&transfer.payload),
                }
            }
            kind @ (TransferKind::Request | TransferKind::Response) => {
                let source = node_id.ok_or(TxError::ServiceNoSourceID)?;
                let destination = metadata
                    .destination_node_id
                    .ok_or(TxError::ServiceNoDestinationID)?;
                FrameHeader {
                    priority: metadata.priority,
                    transfer_kind: kind,
                    data_type_id: metadata.data_type_id,
                    source_node_id: Some(source),
                    destination_node_id: Some(destination),
                    discriminator: 0,
                }
            }
        };

        let crc = if single_frame {
            None
        } else {
            let mut crc = Crc16::from_signature(data_type_signature);
            crc.digest(&transfer.payload);
            // FD padding of the last frame is covered by the CRC
            if fd {
                let last = (transfer.payload.len() + 2) % (mtu - 1);
                if last != 0 {
                    let padding = fd_padded_len(last + 1) - (last + 1);
                    crc.digest(&[0u8; FD_MTU][..padding]);
                }
            }
            Some(crc.get_crc().to_le_bytes())
        };

        Ok(Self {
            transfer,
            frame_id: header.encode(),
            fd,
            crc,
            offset: 0,
            toggle: false,
            is_start: true,
            can_frame: None,
        })
    }

    fn mtu(&self) -> usize {
        if self.fd {
            FD_MTU
        } else {
            CLASSIC_MTU
        }
    }

    fn prefix_len(&self) -> usize {
        if self.crc.is_some() {
            2
        } else {
            0
        }
    }

    fn stream_len(&self) -> usize {
        self.prefix_len() + self.transfer.payload.len()
    }
}

impl<'a, C: Clock> StreamingIterator for TransferIter<'a, C> {
    type Item = CanFrame<C>;

    fn get(&self) -> Option<&Self::Item> {
        self.can_frame.as_ref()
    }

    fn advance(&mut self) {
        let stream_len = self.stream_len();
        if !self.is_start && self.offset >= stream_len {
            self.can_frame = None;
            return;
        }

        let capacity = self.mtu() - 1;
        let take = core::cmp::min(stream_len - self.offset, capacity);
        let is_end = self.offset + take == stream_len;
        let prefix_len = self.prefix_len();

        let frame = self.can_frame.get_or_insert_with(|| CanFrame {
            timestamp: self.transfer.metadata.timestamp,
            id: self.frame_id,
            fd: self.fd,
            payload: ArrayVec::new(),
        });
        frame.payload.clear();

        let mut position = self.offset;
        let end = self.offset + take;
        if let Some(crc) = self.crc {
            while position < end && position < prefix_len {
                frame.payload.push(crc[position]);
                position += 1;
            }
        }
        frame.payload.extend(
            self.transfer.payload[position - prefix_len..end - prefix_len]
                .iter()
                .copied(),
        );

        if self.fd && is_end {
            let padded = fd_padded_len(take + 1);
            frame
                .payload
                .extend(core::iter::repeat(0u8).take(padded - take - 1));
        }

        frame.payload.push(TailByte::new(
            self.is_start,
            is_end,
            self.toggle,
            self.transfer.metadata.transfer_id,
        ));

        self.offset = end;
        self.toggle = !self.toggle;
        self.is_start = false;
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let stream_len = self.stream_len();
        let remaining = stream_len.saturating_sub(self.offset);
        let frames = if self.is_start && remaining == 0 {
            1
        } else {
            (remaining + self.mtu() - 2) / (self.mtu() - 1)
        };
        (frames, Some(frames))
    }
}
