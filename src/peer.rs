//! `Peer`: one remote endpoint on one `Net` (spec.md §3, §4.4).
//!
//! All fields that change together on a connect/disconnect transition
//! (state, sequence counters, rings, per-peer subscription set) are kept
//! behind one `Mutex<PeerSession>` rather than scattered atomics, so a
//! transition is a single critical section and can never be observed
//! half-applied — mirroring how the teacher's `Pipe` (`pipe.rs`) keeps
//! its whole `Box<dyn PipeState>` as one swapped value instead of a
//! cluster of independently-mutated fields.

use std::sync::Mutex;

use crate::filter::FilterModule;
use crate::mid::{Mid, Qos};
use crate::ring::{DeferredRing, SendRing};
use crate::sb::PipeId;
use crate::subscription::PeerSubscriptionTable;
use crate::telemetry::PeerCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    Disconnected,
    Connected,
}

/// Result of feeding one incoming APP sequence number through ordering
/// (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOrderingOutcome {
    /// Deliver now; `next_expected` has been advanced past it.
    InOrder,
    /// Out of order; stashed in the DeferredRing, a NACK is owed.
    Deferred,
    /// Already seen; drop silently.
    Duplicate,
}

struct PeerSession {
    state: PeerConnectionState,
    send_seq: u32,
    next_expected_recv_seq: u32,
    in_order_since_last_ack: u32,
    send_ring: SendRing,
    deferred_ring: DeferredRing,
    subscriptions: PeerSubscriptionTable,
    outbound_pipe: Option<PipeId>,
}

pub struct Peer {
    pub processor_id: u32,
    pub spacecraft_id: u32,
    pub filters: Vec<Box<dyn FilterModule>>,
    pub counters: PeerCounters,
    send_ring_capacity: usize,
    deferred_ring_capacity: usize,
    peer_sub_capacity: usize,
    session: Mutex<PeerSession>,
}

impl Peer {
    pub fn new(
        processor_id: u32,
        spacecraft_id: u32,
        filters: Vec<Box<dyn FilterModule>>,
        send_ring_capacity: usize,
        deferred_ring_capacity: usize,
        peer_sub_capacity: usize,
    ) -> Peer {
        Peer {
            processor_id,
            spacecraft_id,
            filters,
            counters: PeerCounters::new(),
            send_ring_capacity,
            deferred_ring_capacity,
            peer_sub_capacity,
            session: Mutex::new(PeerSession {
                state: PeerConnectionState::Disconnected,
                send_seq: 0,
                next_expected_recv_seq: 0,
                in_order_since_last_ack: 0,
                send_ring: SendRing::new(send_ring_capacity),
                deferred_ring: DeferredRing::new(deferred_ring_capacity),
                subscriptions: PeerSubscriptionTable::new(peer_sub_capacity),
                outbound_pipe: None,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().unwrap().state == PeerConnectionState::Connected
    }

    /// DISCONNECTED -> CONNECTED (spec.md §4.4): reset sequence counters,
    /// clear rings, adopt `pipe` as the outbound pipe if none is open
    /// yet. Returns the pipe to advertise subscriptions on.
    pub fn mark_connected(&self, pipe: PipeId) -> PipeId {
        let mut session = self.session.lock().unwrap();
        session.state = PeerConnectionState::Connected;
        session.send_seq = 0;
        session.next_expected_recv_seq = 0;
        session.in_order_since_last_ack = 0;
        session.send_ring = SendRing::new(self.send_ring_capacity);
        session.deferred_ring = DeferredRing::new(self.deferred_ring_capacity);
        if session.outbound_pipe.is_none() {
            session.outbound_pipe = Some(pipe);
        }
        session.outbound_pipe.unwrap()
    }

    /// CONNECTED -> DISCONNECTED (spec.md §4.4): clears the per-peer
    /// subscription set and rings, and returns (outbound pipe, subscribed
    /// MIDs) so the caller can close the pipe and issue the corresponding
    /// local unsubscribes on the software bus.
    pub fn mark_disconnected(&self) -> (Option<PipeId>, Vec<Mid>) {
        let mut session = self.session.lock().unwrap();
        session.state = PeerConnectionState::Disconnected;
        let mids: Vec<Mid> = session.subscriptions.iter().map(|(mid, _)| mid).collect();
        session.subscriptions = PeerSubscriptionTable::new(self.peer_sub_capacity);
        session.send_ring.clear();
        session.deferred_ring.clear();
        let pipe = session.outbound_pipe.take();
        drop(session);
        self.counters.set_sub_count(0);
        (pipe, mids)
    }

    pub fn outbound_pipe(&self) -> Option<PipeId> {
        self.session.lock().unwrap().outbound_pipe
    }

    /// Assigns and returns the next send sequence number.
    pub fn next_send_seq(&self) -> u32 {
        let mut session = self.session.lock().unwrap();
        let seq = session.send_seq;
        session.send_seq = session.send_seq.wrapping_add(1);
        seq
    }

    pub fn store_sent_frame(&self, seq: u32, frame: Vec<u8>) {
        self.session.lock().unwrap().send_ring.insert(seq, frame);
    }

    pub fn take_for_retransmit(&self, seq: u32, ceiling: u32) -> Option<Vec<u8>> {
        self.session.lock().unwrap().send_ring.take_for_retransmit(seq, ceiling)
    }

    pub fn ack_through(&self, seq: u32) {
        self.session.lock().unwrap().send_ring.ack_through(seq);
    }

    /// Applies ordering to an incoming APP sequence number (spec.md
    /// §4.7). On `Deferred`, the frame has already been stashed in the
    /// DeferredRing and the caller should emit a NACK for the returned
    /// `next_expected`. On `InOrder`, `next_expected_recv_seq` has
    /// already advanced past `seq` and `drain_deferred_ready` should be
    /// called next to pick up any now-contiguous frames.
    pub fn accept_recv_seq(&self, seq: u32, frame: Vec<u8>) -> (RecvOrderingOutcome, u32) {
        let mut session = self.session.lock().unwrap();
        let expected = session.next_expected_recv_seq;
        if seq == expected {
            session.next_expected_recv_seq = expected.wrapping_add(1);
            session.in_order_since_last_ack = session.in_order_since_last_ack.saturating_add(1);
            (RecvOrderingOutcome::InOrder, expected)
        } else if seq > expected {
            session.deferred_ring.insert(seq, frame);
            session.in_order_since_last_ack = 0;
            (RecvOrderingOutcome::Deferred, expected)
        } else {
            (RecvOrderingOutcome::Duplicate, expected)
        }
    }

    /// Drains DeferredRing entries now contiguous with the (already
    /// advanced) next-expected sequence, advancing it further for each
    /// one drained.
    pub fn drain_deferred_ready(&self) -> Vec<(u32, Vec<u8>)> {
        let mut session = self.session.lock().unwrap();
        let next_expected = session.next_expected_recv_seq;
        let drained = session.deferred_ring.drain_ready(next_expected);
        session.next_expected_recv_seq = next_expected.wrapping_add(drained.len() as u32);
        session.in_order_since_last_ack = session.in_order_since_last_ack.saturating_add(drained.len() as u32);
        drained
    }

    /// ACK throttling (spec.md §4.7): returns `Some(last_accepted_seq)`
    /// and resets the counter once `threshold` in-order messages have
    /// accumulated since the last ACK.
    pub fn take_ack_if_due(&self, threshold: u32) -> Option<u32> {
        let mut session = self.session.lock().unwrap();
        if session.in_order_since_last_ack < threshold {
            return None;
        }
        session.in_order_since_last_ack = 0;
        Some(session.next_expected_recv_seq.wrapping_sub(1))
    }

    pub fn subscribe_peer(&self, mid: Mid, qos: Qos) -> Result<bool, crate::subscription::SubscriptionError> {
        self.session.lock().unwrap().subscriptions.subscribe(mid, qos)
    }

    pub fn unsubscribe_peer(&self, mid: Mid) -> bool {
        self.session.lock().unwrap().subscriptions.unsubscribe(mid)
    }

    pub fn peer_subscription_mids(&self) -> Vec<Mid> {
        self.session.lock().unwrap().subscriptions.iter().map(|(mid, _)| mid).collect()
    }

    pub fn peer_subscription_count(&self) -> u32 {
        self.session.lock().unwrap().subscriptions.len() as u32
    }
}
