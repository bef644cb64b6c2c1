//! Simulated bus with the allocating node and one or more Here4 receivers
//! that start without a node ID.

use std::collections::VecDeque;

use dronecan_gnss::allocator::{AllocatorConfig, NodeRecord};
use dronecan_gnss::dsdl::allocation::{Allocation, MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST};
use dronecan_gnss::dsdl::gnss::Fix2;
use dronecan_gnss::dsdl::node_status::{Mode, NodeStatus};
use dronecan_gnss::dsdl::{DataType, DecodedMessage};
use dronecan_gnss::time::ManualClock;
use dronecan_gnss::transport::can::{Can, CanFrame};
use dronecan_gnss::types::{NodeId, Timestamp, TransferId, UniqueId};
use dronecan_gnss::{Event, Node, NodeConfig, Priority, Transfer};
use streaming_iterator::StreamingIterator;

const SERVER_ID: NodeId = 125;

const HERE4_A: UniqueId = [
    0x29, 0x00, 0x2c, 0x00, 0x16, 0x51, 0x31, 0x32, 0x35, 0x38, 0x34, 0x38, 0x00, 0x00, 0x00, 0x01,
];
const HERE4_B: UniqueId = [
    0x3a, 0x00, 0x27, 0x00, 0x16, 0x51, 0x31, 0x32, 0x35, 0x38, 0x34, 0x38, 0x00, 0x00, 0x00, 0x02,
];

fn server(records: Vec<NodeRecord>) -> Node<ManualClock> {
    let config = NodeConfig {
        node_id: SERVER_ID,
        status_interval: None,
        allocator: Some(AllocatorConfig::default()),
        allocation_records: records,
        ..Default::default()
    };
    Node::new(config, ManualClock::at(0)).unwrap()
}

fn frames_of<T: DataType>(
    message: &T,
    source: Option<NodeId>,
    transfer_id: TransferId,
    now: Timestamp<ManualClock>,
) -> Vec<CanFrame<ManualClock>> {
    let transfer = Transfer::message(now, Priority::MEDIUM, T::DATA_TYPE_ID, transfer_id, message.encode(true));
    let mut iter = Can::transmit(&transfer, source, T::SIGNATURE, false).unwrap();
    let mut frames = Vec::new();
    while let Some(frame) = iter.next() {
        frames.push(frame.clone());
    }
    frames
}

/// A GNSS receiver running the requester side of dynamic node ID allocation.
struct Here4 {
    unique_id: UniqueId,
    /// Decodes what it hears on the bus.
    rx: Node<ManualClock>,
    node_id: Option<NodeId>,
    transfer_id: TransferId,
    /// Delay before answering an echo of our own prefix.
    reply_delay: u32,
    /// Delay before starting over after hearing someone else's prefix.
    backoff: u32,
    pending: Option<(u32, Vec<CanFrame<ManualClock>>)>,
}

impl Here4 {
    fn new(unique_id: UniqueId, reply_delay: u32, backoff: u32) -> Self {
        let config = NodeConfig {
            node_id: 0,
            status_interval: None,
            allocator: None,
            ..Default::default()
        };
        Self {
            unique_id,
            rx: Node::new(config, ManualClock::at(0)).unwrap(),
            node_id: None,
            transfer_id: 0,
            reply_delay,
            backoff,
            pending: None,
        }
    }

    fn schedule_request(&mut self, at: u32, first: bool, fragment: &[u8]) {
        let request = Allocation::new(0, first, fragment).unwrap();
        let frames = frames_of(&request, None, self.transfer_id, ManualClock::at(at));
        self.transfer_id = (self.transfer_id + 1) & 0x1f;
        self.pending = Some((at, frames));
    }

    fn power_on(&mut self, at: u32) {
        let uid = self.unique_id;
        self.schedule_request(at, true, &uid[..MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST]);
    }

    fn hear(&mut self, frame: &CanFrame<ManualClock>, now: u32) {
        let event = match self.rx.receive_frame(frame).unwrap() {
            Some(event) => event,
            None => return,
        };
        let response = match (event.message, event.source_node_id) {
            (DecodedMessage::Allocation(response), Some(_)) => response,
            _ => return,
        };
        if self.node_id.is_some() {
            return;
        }

        let uid = self.unique_id;
        let known = response.unique_id.len();
        if response.node_id != 0 && known == uid.len() && response.unique_id[..] == uid[..] {
            self.node_id = Some(response.node_id);
            self.pending = None;
        } else if known < uid.len() && uid.starts_with(&response.unique_id[..]) {
            let end = core::cmp::min(known + MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST, uid.len());
            self.schedule_request(now + self.reply_delay, false, &uid[known..end]);
        } else {
            self.schedule_request(now + self.backoff, true, &uid[..MAX_LENGTH_OF_UNIQUE_ID_IN_REQUEST]);
        }
    }

    fn publish<T: DataType>(&mut self, message: &T, now: u32) -> Vec<CanFrame<ManualClock>> {
        let frames = frames_of(message, self.node_id, self.transfer_id, ManualClock::at(now));
        self.transfer_id = (self.transfer_id + 1) & 0x1f;
        frames
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Sender {
    Server,
    Here4(usize),
}

struct Bus {
    server: Node<ManualClock>,
    receivers: Vec<Here4>,
    now: u32,
    events: Vec<Event<ManualClock>>,
}

impl Bus {
    fn new(server: Node<ManualClock>, receivers: Vec<Here4>) -> Self {
        Self {
            server,
            receivers,
            now: 0,
            events: Vec::new(),
        }
    }

    /// Deliver frames until nobody has anything left to say, or `deadline`.
    fn run(&mut self, deadline: u32) {
        let mut in_flight: VecDeque<(Sender, CanFrame<ManualClock>)> = VecDeque::new();
        loop {
            while let Some((sender, frame)) = in_flight.pop_front() {
                if sender != Sender::Server {
                    if let Some(event) = self.server.receive_frame(&frame).unwrap() {
                        self.events.push(event);
                    }
                    while let Some(reply) = self.server.pop_frame() {
                        in_flight.push_back((Sender::Server, reply));
                    }
                }
                for (index, receiver) in self.receivers.iter_mut().enumerate() {
                    if sender != Sender::Here4(index) {
                        receiver.hear(&frame, self.now);
                    }
                }
            }

            let next = self.receivers.iter().filter_map(|r| r.pending.as_ref().map(|p| p.0)).min();
            match next {
                Some(at) if at <= deadline => self.now = at,
                _ => break,
            }
            for (index, receiver) in self.receivers.iter_mut().enumerate() {
                if receiver.pending.as_ref().map(|p| p.0) == Some(self.now) {
                    if let Some((_, frames)) = receiver.pending.take() {
                        for frame in frames {
                            in_flight.push_back((Sender::Here4(index), frame));
                        }
                    }
                }
            }
            self.server.update(ManualClock::at(self.now));
        }
    }

    fn send(&mut self, frames: Vec<CanFrame<ManualClock>>) -> Vec<Event<ManualClock>> {
        frames
            .iter()
            .filter_map(|frame| self.server.receive_frame(frame).unwrap())
            .collect()
    }
}

fn fix2() -> Fix2 {
    Fix2 {
        timestamp_usec: 1_000_000,
        gnss_timestamp_usec: 1_700_000_000_000_000,
        gnss_time_standard: 2,
        num_leap_seconds: 18,
        longitude_deg_1e8: -740059740,
        latitude_deg_1e8: 4071277600,
        height_ellipsoid_mm: 10000,
        height_msl_mm: 42500,
        ned_velocity: [3.0, 4.0, -0.5],
        sats_used: 17,
        status: 3,
        mode: 2,
        sub_mode: 1,
        covariance: heapless::Vec::from_slice(&[1.5, 2.0]).unwrap(),
        pdop: 1.25,
    }
}

#[test]
fn here4_gets_node_id_then_reports_fix() {
    let mut here4 = Here4::new(HERE4_A, 10, 300);
    here4.power_on(0);
    let mut bus = Bus::new(server(Vec::new()), vec![here4]);
    bus.run(5_000);

    let node_id = bus.receivers[0].node_id.expect("not allocated");
    assert_eq!(node_id, 1);

    // The three requests came through as events too
    assert_eq!(bus.events.len(), 3);
    assert!(bus.events.iter().all(|e| e.source_node_id.is_none()));

    let now = bus.now + 100;
    let status = NodeStatus {
        uptime_sec: 3,
        ..Default::default()
    };
    let status_frames = bus.receivers[0].publish(&status, now);
    let events = bus.send(status_frames);
    assert_eq!(events.len(), 1);
    assert!(bus.server.monitor().is_online(node_id, ManualClock::at(now)));

    let fix_frames = bus.receivers[0].publish(&fix2(), now + 10);
    assert!(fix_frames.len() > 1);
    let events = bus.send(fix_frames);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source_node_id, Some(node_id));
    match &events[0].message {
        DecodedMessage::Fix2(fix) => {
            assert_eq!(fix, &fix2());
            assert_eq!(fix.lat_deg(), 40.712776);
            assert_eq!(fix.lon_deg(), -7.4005974);
            assert_eq!(fix.height_msl_m(), 42.5);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn allocation_survives_server_restart() {
    let mut here4 = Here4::new(HERE4_A, 10, 300);
    here4.power_on(0);
    let mut bus = Bus::new(server(Vec::new()), vec![here4]);
    bus.run(5_000);
    let first = bus.receivers[0].node_id.expect("not allocated");

    // Hand out another ID so the next free one differs
    let mut other = Here4::new(HERE4_B, 10, 300);
    other.power_on(bus.now + 10);
    bus.receivers = vec![other];
    bus.run(10_000);
    assert_ne!(bus.receivers[0].node_id, Some(first));

    let records = bus.server.allocator().unwrap().records();
    assert_eq!(records.len(), 2);

    // Fresh server seeded from the persisted table, Here4 power cycled
    let mut here4 = Here4::new(HERE4_A, 10, 300);
    here4.power_on(0);
    let mut bus = Bus::new(server(records), vec![here4]);
    bus.run(5_000);
    assert_eq!(bus.receivers[0].node_id, Some(first));
    assert_eq!(bus.server.allocator().unwrap().records().len(), 2);
}

#[test]
fn simultaneous_power_on_resolves_to_distinct_ids() {
    let mut a = Here4::new(HERE4_A, 10, 300);
    let mut b = Here4::new(HERE4_B, 15, 450);
    a.power_on(0);
    b.power_on(0);
    let mut bus = Bus::new(server(Vec::new()), vec![a, b]);
    bus.run(10_000);

    let a = bus.receivers[0].node_id.expect("A not allocated");
    let b = bus.receivers[1].node_id.expect("B not allocated");
    assert_ne!(a, b);

    let allocator = bus.server.allocator().unwrap();
    assert_eq!(allocator.table().node_id_of(&HERE4_A), Some(a));
    assert_eq!(allocator.table().node_id_of(&HERE4_B), Some(b));
    assert_eq!(allocator.table().len(), 2);
    assert_eq!(allocator.pending_sessions(), 0);
}

#[test]
fn online_node_ids_not_reused() {
    let mut bus = Bus::new(server(Vec::new()), Vec::new());

    // Node 1 is alive but was configured by hand, so the table doesn't know it
    let status = NodeStatus {
        mode: Mode::Operational as u8,
        ..Default::default()
    };
    let frames = frames_of(&status, Some(1), 0, ManualClock::at(0));
    bus.send(frames);

    let mut here4 = Here4::new(HERE4_A, 10, 300);
    here4.power_on(0);
    bus.receivers = vec![here4];
    bus.run(1_000);
    assert_eq!(bus.receivers[0].node_id, Some(2));
}

#[test]
fn captured_here4_frames() {
    let mut server = server(Vec::new());

    // First allocation request of a Here4 after power-up, anonymous
    let data = hex::decode("0129002c001651d0").unwrap();
    let frame = CanFrame::new(ManualClock::at(0), 0x105e7100, false, &data).unwrap();
    let event = server.receive_frame(&frame).unwrap().unwrap();
    assert_eq!(event.source_node_id, None);
    assert_eq!(event.priority, Priority::MEDIUM);
    assert_eq!(event.transfer_id, 16);
    match event.message {
        DecodedMessage::Allocation(request) => {
            assert!(request.first_part_of_unique_id);
            assert_eq!(&request.unique_id[..], &HERE4_A[..6]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(server.pending_frames(), 1);

    // Heartbeat of a Here4 sitting at node 127
    let data = hex::decode("ad000000080000cb").unwrap();
    let frame = CanFrame::new(ManualClock::at(10), 0x1401557f, false, &data).unwrap();
    let event = server.receive_frame(&frame).unwrap().unwrap();
    assert_eq!(event.source_node_id, Some(127));
    assert_eq!(event.transfer_id, 11);
    match event.message {
        DecodedMessage::NodeStatus(status) => {
            assert_eq!(status.uptime_sec, 173);
            assert_eq!(status.mode(), Some(Mode::Initialization));
        }
        other => panic!("unexpected {:?}", other),
    }
}
