//! BTreeMap based SessionManager implementation.
//!
//! Every in-flight transfer gets its own slot, so any number of sources can
//! interleave their frames without disturbing each other.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use embedded_time::duration::Milliseconds;
use embedded_time::Clock;
use log::debug;

use crate::crc16::Crc16;
use crate::internal::InternalRxFrame;
use crate::session::{SessionManager, Subscription};
use crate::time::timestamp_expired;
use crate::transfer::{Transfer, TransferKind};
use crate::types::*;
use crate::RxError;

/// Identifies one in-flight transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub transfer_kind: TransferKind,
    pub data_type_id: DataTypeId,
    /// 0 for anonymous sources, which never get a slot in practice.
    pub source_node_id: NodeId,
    pub transfer_id: TransferId,
}

impl SlotKey {
    pub fn from_frame<C: Clock>(frame: &InternalRxFrame<C>) -> Self {
        Self {
            transfer_kind: frame.transfer_kind,
            data_type_id: frame.data_type_id,
            source_node_id: frame.source_node_id.unwrap_or(0),
            transfer_id: frame.transfer_id,
        }
    }
}

/// Partially received multi-frame transfer.
#[derive(Debug)]
struct Slot<C: Clock> {
    /// Timestamp of the start frame, handed out with the transfer.
    started: Timestamp<C>,
    last_frame: Timestamp<C>,
    /// Toggle the next frame must carry.
    toggle: bool,
    crc: Crc16,
    expected_crc: u16,
    payload: Vec<u8>,
}

/// Reassembles multi-frame transfers for subscribed data types.
///
/// Single-frame transfers bypass the slot table entirely and are delivered
/// whether subscribed or not.
#[derive(Debug)]
pub struct TransferReassembler<C: Clock> {
    subscriptions: Vec<Subscription>,
    sessions: BTreeMap<SlotKey, Slot<C>>,
    timeout: Milliseconds<u32>,
}

impl<C> TransferReassembler<C>
where
    C: Clock,
    C::T: TryFrom<u32>,
{
    /// `timeout` bounds the gap between two frames of the same transfer.
    pub fn new(timeout: Milliseconds<u32>) -> Self {
        Self {
            subscriptions: Vec::new(),
            sessions: BTreeMap::new(),
            timeout,
        }
    }

    /// Add a subscription, replacing any existing one for the same data type.
    pub fn subscribe(&mut self, subscription: Subscription) {
        self.unsubscribe(subscription.transfer_kind, subscription.data_type_id);
        self.subscriptions.push(subscription);
    }

    /// Remove a subscription, dropping any of its in-flight transfers.
    pub fn unsubscribe(&mut self, transfer_kind: TransferKind, data_type_id: DataTypeId) {
        self.subscriptions
            .retain(|s| !(s.transfer_kind == transfer_kind && s.data_type_id == data_type_id));
        self.sessions
            .retain(|k, _| !(k.transfer_kind == transfer_kind && k.data_type_id == data_type_id));
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn has_session(&self, key: &SlotKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Keys of all transfers currently being reassembled.
    pub fn active_sessions(&self) -> impl Iterator<Item = &SlotKey> {
        self.sessions.keys()
    }

    fn subscription_for(&self, frame: &InternalRxFrame<C>) -> Option<Subscription> {
        self.subscriptions
            .iter()
            .find(|s| Self::matches_sub(s, frame))
            .copied()
    }

    fn start(&mut self, key: SlotKey, frame: &InternalRxFrame<C>, sub: Subscription) -> Result<(), RxError> {
        if frame.toggle {
            return Err(RxError::ToggleViolation);
        }
        if frame.payload.len() < 2 {
            return Err(RxError::NonLastUnderUtilization);
        }

        let (crc_bytes, data) = frame.payload.split_at(2);
        if data.len() > sub.extent {
            return Err(RxError::PayloadTooLarge { extent: sub.extent });
        }

        let mut crc = Crc16::from_signature(sub.data_type_signature);
        crc.digest(data);

        let mut payload = Vec::with_capacity(sub.extent);
        payload.extend_from_slice(data);

        self.sessions.insert(
            key,
            Slot {
                started: frame.timestamp,
                last_frame: frame.timestamp,
                toggle: true,
                crc,
                expected_crc: u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]),
                payload,
            },
        );
        Ok(())
    }
}

impl<C> SessionManager<C> for TransferReassembler<C>
where
    C: Clock,
    C::T: TryFrom<u32>,
{
    fn ingest(&mut self, frame: InternalRxFrame<C>) -> Result<Option<Transfer<C>>, RxError> {
        let key = SlotKey::from_frame(&frame);

        // A new start frame always wins over whatever was in progress
        if frame.start_of_transfer && self.sessions.remove(&key).is_some() {
            debug!("restarting transfer {:?}", key);
        }

        if frame.is_single_frame() {
            let payload = frame.payload.to_vec();
            return Ok(Some(Transfer::from_frame(&frame, frame.timestamp, payload)));
        }

        let sub = match self.subscription_for(&frame) {
            Some(sub) => sub,
            None => return Ok(None),
        };

        if frame.start_of_transfer {
            self.start(key, &frame, sub)?;
            return Ok(None);
        }

        let slot = self
            .sessions
            .get_mut(&key)
            .ok_or(RxError::MissingStartOfTransfer)?;

        if timestamp_expired(self.timeout, frame.timestamp, slot.last_frame) {
            self.sessions.remove(&key);
            return Err(RxError::SessionTimeout);
        }
        if frame.toggle != slot.toggle {
            self.sessions.remove(&key);
            return Err(RxError::ToggleViolation);
        }
        if slot.payload.len() + frame.payload.len() > sub.extent {
            self.sessions.remove(&key);
            return Err(RxError::PayloadTooLarge { extent: sub.extent });
        }

        slot.crc.digest(frame.payload);
        slot.payload.extend_from_slice(frame.payload);
        slot.toggle = !slot.toggle;
        slot.last_frame = frame.timestamp;

        if !frame.end_of_transfer {
            return Ok(None);
        }

        let slot = match self.sessions.remove(&key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let computed = slot.crc.get_crc();
        if computed != slot.expected_crc {
            return Err(RxError::CrcMismatch {
                expected: slot.expected_crc,
                computed,
            });
        }

        Ok(Some(Transfer::from_frame(&frame, slot.started, slot.payload)))
    }

    fn update_sessions(&mut self, timestamp: Timestamp<C>) {
        let timeout = self.timeout;
        self.sessions.retain(|key, slot| {
            let stale = timestamp_expired(timeout, timestamp, slot.last_frame);
            if stale {
                debug!("evicting stale transfer {:?}", key);
            }
            !stale
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::time::ManualClock;
    use crate::transport::can::{Can, CanFrame};
    use crate::Priority;
    use streaming_iterator::StreamingIterator;

    const SIGNATURE: u64 = 0xCA41E7000F37435F;
    const TYPE_ID: DataTypeId = 1063;

    fn reassembler() -> TransferReassembler<ManualClock> {
        let mut r = TransferReassembler::new(Milliseconds(1000u32));
        r.subscribe(Subscription::message(TYPE_ID, SIGNATURE, 128));
        r
    }

    fn frames_for(payload: &[u8], source: NodeId, transfer_id: TransferId, at: u32) -> Vec<CanFrame<ManualClock>> {
        frames_over(payload, source, transfer_id, at, false)
    }

    fn frames_over(
        payload: &[u8],
        source: NodeId,
        transfer_id: TransferId,
        at: u32,
        fd: bool,
    ) -> Vec<CanFrame<ManualClock>> {
        let transfer = Transfer::message(ManualClock::at(at), Priority::MEDIUM, TYPE_ID, transfer_id, payload.to_vec());
        let mut iter = Can::transmit(&transfer, Some(source), SIGNATURE, fd).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = iter.next() {
            frames.push(frame.clone());
        }
        frames
    }

    fn feed(
        r: &mut TransferReassembler<ManualClock>,
        frame: &CanFrame<ManualClock>,
    ) -> Result<Option<Transfer<ManualClock>>, RxError> {
        let rx = Can::rx_process_frame(Some(127), frame).unwrap().unwrap();
        r.ingest(rx)
    }

    fn key(source: NodeId, transfer_id: TransferId) -> SlotKey {
        SlotKey {
            transfer_kind: TransferKind::Message,
            data_type_id: TYPE_ID,
            source_node_id: source,
            transfer_id,
        }
    }

    #[test]
    fn single_frame_completes_immediately() {
        let mut r = reassembler();
        let frames = frames_for(&[1, 2, 3, 4, 5, 6, 7], 10, 0, 0);
        assert_eq!(frames.len(), 1);

        let transfer = feed(&mut r, &frames[0]).unwrap().unwrap();
        assert_eq!(transfer.payload, &[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(transfer.metadata.source_node_id, Some(10));
        assert_eq!(r.active_sessions().count(), 0);
    }

    #[test]
    fn transport_recorded_on_transfer() {
        let mut r = reassembler();
        let classic = frames_over(&[0; 20], 10, 0, 0, false);
        let transfer = classic.iter().find_map(|f| feed(&mut r, f).unwrap()).unwrap();
        assert!(transfer.tail_array_optimized());

        // Multi-frame on FD too, with the padding of the last frame kept
        let fd = frames_over(&[0; 70], 10, 1, 0, true);
        assert_eq!(fd.len(), 2);
        let transfer = fd.iter().find_map(|f| feed(&mut r, f).unwrap()).unwrap();
        assert!(transfer.metadata.fd);
        assert!(!transfer.tail_array_optimized());
        assert!(transfer.payload.len() >= 70);
    }

    #[test]
    fn single_frame_of_unknown_type_still_delivered() {
        let mut r = TransferReassembler::<ManualClock>::new(Milliseconds(1000u32));
        let frames = frames_for(&[9], 10, 0, 0);
        assert!(feed(&mut r, &frames[0]).unwrap().is_some());
    }

    #[test]
    fn multi_frame_unsubscribed_ignored() {
        let mut r = TransferReassembler::<ManualClock>::new(Milliseconds(1000u32));
        let frames = frames_for(&[0; 20], 10, 0, 0);
        for frame in &frames {
            assert!(feed(&mut r, frame).unwrap().is_none());
        }
        assert_eq!(r.active_sessions().count(), 0);
    }

    #[test]
    fn multi_frame_exact_payload() {
        let mut r = reassembler();
        let payload: Vec<u8> = (0..40).collect();
        let frames = frames_for(&payload, 10, 3, 100);

        let (last, rest) = frames.split_last().unwrap();
        for frame in rest {
            assert!(feed(&mut r, frame).unwrap().is_none());
        }
        assert!(r.has_session(&key(10, 3)));

        let transfer = feed(&mut r, last).unwrap().unwrap();
        assert_eq!(transfer.payload, payload);
        assert_eq!(transfer.metadata.transfer_id, 3);
        assert_eq!(transfer.metadata.timestamp, ManualClock::at(100));
        assert!(!r.has_session(&key(10, 3)));
    }

    #[test]
    fn mutated_byte_fails_crc() {
        let payload: Vec<u8> = (0..40).collect();
        let frames = frames_for(&payload, 10, 3, 0);

        // Every data byte of every frame but the tail byte, CRC bytes excluded
        for (index, _) in frames.iter().enumerate() {
            let first = if index == 0 { 2 } else { 0 };
            for byte in first..frames[index].payload.len() - 1 {
                let mut r = reassembler();
                let mut corrupted = frames.clone();
                corrupted[index].payload[byte] ^= 0x01;

                let mut result = Ok(None);
                for frame in &corrupted {
                    result = feed(&mut r, frame);
                }
                assert!(
                    std::matches!(result, Err(RxError::CrcMismatch { .. })),
                    "frame {} byte {} not caught",
                    index,
                    byte
                );
            }
        }
    }

    #[test]
    fn toggle_violation_isolated() {
        let mut r = reassembler();
        let a = frames_for(&[0xaa; 20], 10, 1, 0);
        let b = frames_for(&[0xbb; 20], 11, 1, 0);
        assert_eq!(a.len(), 4);

        feed(&mut r, &a[0]).unwrap();
        feed(&mut r, &b[0]).unwrap();
        feed(&mut r, &b[1]).unwrap();

        // Replay a[0]'s toggle on a continuation frame
        let mut bad = a[1].clone();
        let tail = bad.payload.pop().unwrap();
        bad.payload.push(tail & !0x20);
        assert_eq!(feed(&mut r, &bad).unwrap_err(), RxError::ToggleViolation);
        assert!(!r.has_session(&key(10, 1)));

        // The other transfer finishes as if nothing happened
        feed(&mut r, &b[2]).unwrap();
        let transfer = feed(&mut r, &b[3]).unwrap().unwrap();
        assert_eq!(transfer.payload, &[0xbb; 20]);

        // And the broken one can't be continued
        assert_eq!(feed(&mut r, &a[2]).unwrap_err(), RxError::MissingStartOfTransfer);
    }

    #[test]
    fn start_frame_resets_slot() {
        let mut r = reassembler();
        let first = frames_for(&[1; 20], 10, 4, 0);
        let second = frames_for(&[2; 20], 10, 4, 10);

        feed(&mut r, &first[0]).unwrap();
        feed(&mut r, &first[1]).unwrap();

        let mut result = None;
        for frame in &second {
            result = feed(&mut r, frame).unwrap();
        }
        assert_eq!(result.unwrap().payload, &[2; 20]);
    }

    #[test]
    fn stale_slot_evicted() {
        let mut r = reassembler();
        let frames = frames_for(&[0; 20], 10, 7, 0);
        feed(&mut r, &frames[0]).unwrap();
        assert!(r.has_session(&key(10, 7)));

        r.update_sessions(ManualClock::at(1000));
        assert!(r.has_session(&key(10, 7)));

        r.update_sessions(ManualClock::at(1001));
        assert!(!r.has_session(&key(10, 7)));
        assert_eq!(r.active_sessions().count(), 0);
    }

    #[test]
    fn late_continuation_times_out() {
        let mut r = reassembler();
        let frames = frames_for(&[0; 20], 10, 7, 0);
        feed(&mut r, &frames[0]).unwrap();

        let mut late = frames[1].clone();
        late.timestamp = ManualClock::at(5000);
        assert_eq!(feed(&mut r, &late).unwrap_err(), RxError::SessionTimeout);
        assert!(!r.has_session(&key(10, 7)));
    }

    #[test]
    fn payload_over_extent_dropped() {
        let mut r = TransferReassembler::<ManualClock>::new(Milliseconds(1000u32));
        r.subscribe(Subscription::message(TYPE_ID, SIGNATURE, 10));
        let frames = frames_for(&[0; 20], 10, 0, 0);

        feed(&mut r, &frames[0]).unwrap();
        assert_eq!(
            feed(&mut r, &frames[1]).unwrap_err(),
            RxError::PayloadTooLarge { extent: 10 }
        );
        assert_eq!(r.active_sessions().count(), 0);
    }
}
