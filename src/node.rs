//! The Node struct is the pipeline gluing the transport, the reassembler,
//! the allocation server and the decoder together.
//!
//! It owns no I/O. Frames come in through [`Node::receive_frame`], frames to
//! send wait in a bounded queue drained with [`Node::pop_frame`], and time
//! only moves when the caller passes a timestamp in. That keeps the whole thing
//! usable from an interrupt handler, a blocking loop or an async task alike.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use embedded_time::duration::{Milliseconds, Seconds};
use embedded_time::Clock;
use log::{debug, trace, warn};
use streaming_iterator::StreamingIterator;

use crate::allocator::{AllocationServer, AllocationTable, AllocatorConfig, NodeRecord};
use crate::dsdl::node_status::{Health, Mode, NodeStatus};
use crate::dsdl::{self, Allocation, DataType, DecodedMessage};
use crate::error::NodeResult;
use crate::monitor::NodeMonitor;
use crate::session::{SessionManager, TransferReassembler};
use crate::transfer::{Transfer, TransferKind};
use crate::transport::can::{Can, CanFrame};
use crate::types::*;
use crate::{Priority, RxError, TxError};

/// Node configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Our own node ID, used as the source of everything we send.
    pub node_id: NodeId,
    /// Send CAN-FD frames instead of classic ones. Payloads are then
    /// serialized without tail array optimization.
    pub fd: bool,
    /// Longest gap between two frames of one transfer.
    pub transfer_timeout: Milliseconds<u32>,
    /// How often to publish our own `NodeStatus`. `None` to stay silent.
    pub status_interval: Option<Milliseconds<u32>>,
    /// How long a node may go without a heartbeat before it counts as gone.
    pub offline_timeout: Milliseconds<u32>,
    /// Run an allocation server. `None` to only listen.
    pub allocator: Option<AllocatorConfig>,
    /// Allocations persisted by a previous run.
    pub allocation_records: Vec<NodeRecord>,
    /// Frames the TX queue holds before further transfers are dropped.
    pub tx_queue_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 125,
            fd: false,
            transfer_timeout: Milliseconds(1000),
            status_interval: Some(Milliseconds(1000)),
            offline_timeout: Milliseconds(3000),
            allocator: Some(AllocatorConfig::default()),
            allocation_records: Vec::new(),
            tx_queue_capacity: 64,
        }
    }
}

/// A decoded message from the bus.
#[derive(Debug)]
pub struct Event<C: Clock> {
    /// Timestamp of the first frame of the transfer.
    pub timestamp: Timestamp<C>,
    pub priority: Priority,
    /// `None` for anonymous messages.
    pub source_node_id: Option<NodeId>,
    pub transfer_id: TransferId,
    pub message: DecodedMessage,
}

impl<C: Clock> Clone for Event<C> {
    fn clone(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            priority: self.priority,
            source_node_id: self.source_node_id,
            transfer_id: self.transfer_id,
            message: self.message.clone(),
        }
    }
}

/// Consumer of decoded messages, e.g. a log writer or a UI.
///
/// Implemented for any `FnMut(&Event<C>)`.
pub trait EventSink<C: Clock> {
    fn on_event(&mut self, event: &Event<C>);
}

impl<C: Clock, F: FnMut(&Event<C>)> EventSink<C> for F {
    fn on_event(&mut self, event: &Event<C>) {
        self(event)
    }
}

/// Diagnostic counters. They only ever go up, and wrap.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub frames_received: u32,
    /// Frames handed out by [`Node::pop_frame`].
    pub frames_sent: u32,
    /// Frames of transfers that didn't fit the TX queue.
    pub frames_dropped: u32,
    pub transfers_received: u32,
    /// Frames rejected before reassembly: bad IDs, bad lengths, anonymous
    /// multi-frame.
    pub frame_errors: u32,
    /// Transfers dropped during reassembly, other than CRC failures.
    pub transfer_errors: u32,
    pub crc_errors: u32,
    pub decode_errors: u32,
    pub allocation_errors: u32,
    pub unknown_messages: u32,
}

/// A DroneCAN node that listens to the bus and optionally hands out node IDs.
#[derive(Debug)]
pub struct Node<C: Clock> {
    node_id: NodeId,
    fd: bool,
    sessions: TransferReassembler<C>,
    monitor: NodeMonitor<C>,
    allocator: Option<AllocationServer<C>>,
    tx_queue: VecDeque<CanFrame<C>>,
    tx_queue_capacity: usize,
    /// Next transfer ID per published data type.
    transfer_ids: BTreeMap<DataTypeId, TransferId>,
    status: NodeStatus,
    status_interval: Option<Milliseconds<u32>>,
    last_status: Option<Timestamp<C>>,
    /// Start of the current uptime second.
    uptime_mark: Timestamp<C>,
    stats: Statistics,
}

impl<C> Node<C>
where
    C: Clock,
    C::T: TryFrom<u32>,
{
    /// `now` is taken as the start of our uptime.
    ///
    /// Fails if the persisted allocation records contradict each other.
    pub fn new(config: NodeConfig, now: Timestamp<C>) -> NodeResult<Self> {
        let mut sessions = TransferReassembler::new(config.transfer_timeout);
        for subscription in dsdl::subscriptions() {
            sessions.subscribe(subscription);
        }

        let allocator = match config.allocator {
            Some(allocator_config) => {
                let table = AllocationTable::from_records(config.allocation_records)?;
                Some(AllocationServer::new(config.node_id, config.fd, allocator_config, table))
            }
            None => None,
        };

        Ok(Self {
            node_id: config.node_id,
            fd: config.fd,
            sessions,
            monitor: NodeMonitor::new(config.offline_timeout),
            allocator,
            tx_queue: VecDeque::new(),
            tx_queue_capacity: config.tx_queue_capacity,
            transfer_ids: BTreeMap::new(),
            status: NodeStatus {
                mode: Mode::Operational as u8,
                health: Health::Ok as u8,
                ..Default::default()
            },
            status_interval: config.status_interval,
            last_status: None,
            uptime_mark: now,
            stats: Statistics::default(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Process one received frame.
    ///
    /// Returns the decoded message once a transfer completes. Broken frames
    /// and transfers are logged, counted and dropped; the only error returned
    /// is an allocation pool running dry.
    pub fn receive_frame(&mut self, frame: &CanFrame<C>) -> NodeResult<Option<Event<C>>> {
        self.stats.frames_received = self.stats.frames_received.wrapping_add(1);

        let frame = match Can::rx_process_frame(Some(self.node_id), frame) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.count_rx_error(&err);
                debug!("{}", err);
                return Ok(None);
            }
        };

        let transfer = match self.sessions.ingest(frame) {
            Ok(Some(transfer)) => transfer,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.count_rx_error(&err);
                debug!("{}", err);
                return Ok(None);
            }
        };
        self.stats.transfers_received = self.stats.transfers_received.wrapping_add(1);

        self.handle_transfer(transfer)
    }

    /// Like [`Node::receive_frame`], handing the event to `sink`.
    pub fn receive_into<S: EventSink<C>>(&mut self, frame: &CanFrame<C>, sink: &mut S) -> NodeResult<()> {
        if let Some(event) = self.receive_frame(frame)? {
            sink.on_event(&event);
        }
        Ok(())
    }

    /// Housekeeping. Call at least a few times per second.
    ///
    /// Drops stale transfers and allocation sessions, forgets silent nodes and
    /// publishes our `NodeStatus` when it's due. The caller is expected to
    /// drain [`Node::pop_frame`] afterwards. While the queue stays full our
    /// `NodeStatus` is dropped and counted in [`Statistics::frames_dropped`].
    pub fn update(&mut self, now: Timestamp<C>) {
        self.sessions.update_sessions(now);
        if let Some(allocator) = self.allocator.as_mut() {
            allocator.update_sessions(now);
        }
        self.monitor.expire(now);

        while let Some(next) = self.uptime_mark.checked_add(Seconds(1u32)) {
            if next > now {
                break;
            }
            self.uptime_mark = next;
            self.status.uptime_sec = self.status.uptime_sec.wrapping_add(1);
        }

        if let Some(interval) = self.status_interval {
            let due = match self.last_status {
                Some(last) => last.checked_add(interval).map_or(true, |deadline| now >= deadline),
                None => true,
            };
            if due {
                self.last_status = Some(now);
                let status = self.status.clone();
                match self.publish(&status, Priority::LOW, now) {
                    Ok(()) => {}
                    Err(err @ TxError::QueueFull { .. }) => debug!("node status not sent: {}", err),
                    Err(err) => warn!("failed to publish node status: {}", err),
                }
            }
        }
    }

    /// Next frame to put on the bus.
    pub fn pop_frame(&mut self) -> Option<CanFrame<C>> {
        let frame = self.tx_queue.pop_front()?;
        self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
        Some(frame)
    }

    pub fn pending_frames(&self) -> usize {
        self.tx_queue.len()
    }

    /// Split a transfer into frames and queue them. The source is always our
    /// own node ID, and the payload must be serialized for our transport.
    ///
    /// A transfer that doesn't fit the queue as a whole is dropped.
    pub fn transmit(&mut self, transfer: &Transfer<C>, data_type_signature: u64) -> Result<(), TxError> {
        let mut frames = Can::transmit(transfer, Some(self.node_id), data_type_signature, self.fd)?;

        let (count, _) = frames.size_hint();
        if self.tx_queue.len() + count > self.tx_queue_capacity {
            self.stats.frames_dropped = self.stats.frames_dropped.wrapping_add(count as u32);
            return Err(TxError::QueueFull {
                capacity: self.tx_queue_capacity,
            });
        }

        while let Some(frame) = frames.next() {
            self.tx_queue.push_back(frame.clone());
        }
        Ok(())
    }

    /// Broadcast a message.
    pub fn publish<T: DataType>(&mut self, message: &T, priority: Priority, now: Timestamp<C>) -> Result<(), TxError> {
        let transfer_id = self.transfer_ids.entry(T::DATA_TYPE_ID).or_insert(0);
        let transfer =
            Transfer::message(now, priority, T::DATA_TYPE_ID, *transfer_id, message.encode(!self.fd)).with_fd(self.fd);
        *transfer_id = next_transfer_id(*transfer_id);
        self.transmit(&transfer, T::SIGNATURE)
    }

    /// Health and mode reported in our `NodeStatus`.
    pub fn set_status(&mut self, health: Health, mode: Mode) {
        self.status.health = health as u8;
        self.status.mode = mode as u8;
    }

    /// Our `NodeStatus` as it will be published next.
    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn monitor(&self) -> &NodeMonitor<C> {
        &self.monitor
    }

    pub fn allocator(&self) -> Option<&AllocationServer<C>> {
        self.allocator.as_ref()
    }

    pub fn sessions(&self) -> &TransferReassembler<C> {
        &self.sessions
    }

    fn handle_transfer(&mut self, transfer: Transfer<C>) -> NodeResult<Option<Event<C>>> {
        let metadata = &transfer.metadata;
        if metadata.transfer_kind != TransferKind::Message {
            trace!(
                "ignoring service {} from node {:?}",
                metadata.data_type_id,
                metadata.source_node_id
            );
            return Ok(None);
        }

        if metadata.data_type_id == Allocation::DATA_TYPE_ID {
            self.handle_allocation(&transfer)?;
        }

        let message = match dsdl::decode_transfer(&transfer) {
            Ok(message) => message,
            Err(err) => {
                self.stats.decode_errors = self.stats.decode_errors.wrapping_add(1);
                debug!("type {}: {}", metadata.data_type_id, err);
                return Ok(None);
            }
        };

        match (&message, metadata.source_node_id) {
            (DecodedMessage::NodeStatus(_), Some(source)) if source == self.node_id => {
                debug!("ignoring NodeStatus carrying our own node ID");
                return Ok(None);
            }
            (DecodedMessage::NodeStatus(status), Some(source)) => {
                self.monitor.update(source, status.clone(), metadata.timestamp);
            }
            (DecodedMessage::Unknown { data_type_id }, _) => {
                self.stats.unknown_messages = self.stats.unknown_messages.wrapping_add(1);
                trace!("unknown message type {}", data_type_id);
            }
            _ => {}
        }

        Ok(Some(Event {
            timestamp: metadata.timestamp,
            priority: metadata.priority,
            source_node_id: metadata.source_node_id,
            transfer_id: metadata.transfer_id,
            message,
        }))
    }

    fn handle_allocation(&mut self, transfer: &Transfer<C>) -> NodeResult<()> {
        let allocator = match self.allocator.as_mut() {
            Some(allocator) => allocator,
            None => return Ok(()),
        };

        match allocator.handle_transfer(transfer, &self.monitor) {
            Ok(Some(response)) => {
                if let Err(err) = self.transmit(&response, Allocation::SIGNATURE) {
                    warn!("failed to queue allocation response: {}", err);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.stats.allocation_errors = self.stats.allocation_errors.wrapping_add(1);
                if err.is_reportable() {
                    warn!("{}", err);
                    Err(err.into())
                } else {
                    debug!("{}", err);
                    Ok(())
                }
            }
        }
    }

    fn count_rx_error(&mut self, err: &RxError) {
        let counter = match err {
            RxError::MalformedId(_)
            | RxError::FrameEmpty
            | RxError::FrameTooLong { .. }
            | RxError::NonLastUnderUtilization
            | RxError::AnonNotSingleFrame => &mut self.stats.frame_errors,
            RxError::CrcMismatch { .. } => &mut self.stats.crc_errors,
            RxError::ToggleViolation
            | RxError::MissingStartOfTransfer
            | RxError::PayloadTooLarge { .. }
            | RxError::SessionTimeout => &mut self.stats.transfer_errors,
        };
        *counter = counter.wrapping_add(1);
    }
}
