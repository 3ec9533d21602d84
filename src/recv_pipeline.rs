//! Receive pipeline (spec.md §4.7, C7).
//!
//! `handle_frame` dispatches one already-unpacked `RecvFrame` by message
//! type. The scheduler (or a dedicated per-net/per-peer recv task) calls
//! the protocol module's `recv_from_net`/`recv_from_peer` in a loop with
//! a small iteration ceiling per wakeup, feeding each result here.

use log::warn;

use crate::filter::{run_recv_chain, FilterContext, FilterResult};
use crate::net::Net;
use crate::peer::{Peer, RecvOrderingOutcome};
use crate::protocol::RecvFrame;
use crate::sb::{SbMessage, SoftwareBus};
use crate::wire::MsgType;

/// ACK throttle threshold (spec.md §4.7 names 16 as the example value).
pub const ACK_THRESHOLD: u32 = 16;

/// What the caller (scheduler) should additionally do after
/// `handle_frame` returns, beyond what it already did internally
/// (publish-to-SB and SendRing bookkeeping happen inside).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvAction {
    None,
    /// Emit a NACK carrying this sequence number.
    SendNack(u32),
    /// Emit an ACK carrying this sequence number.
    SendAck(u32),
    /// Retransmit the SendRing entry at this sequence (ceiling-gated by
    /// the caller via `send_pipeline::retransmit`).
    Retransmit(u32),
    /// The peer's protocol-layer traffic should be treated as
    /// disconnected (e.g. version mismatch).
    ProtocolIncompatible,
}

/// Dispatches one received frame for `peer` (spec.md §4.7).
pub fn handle_frame(peer: &Peer, bus: &dyn SoftwareBus, ctx: &FilterContext, frame: RecvFrame) -> RecvAction {
    peer.counters.record_recv();

    match frame.msg_type {
        MsgType::Protocol => handle_protocol(&frame.payload),
        MsgType::Ack => match crate::wire::unpack_seq_payload(&frame.payload) {
            Ok(seq) => {
                peer.ack_through(seq);
                RecvAction::None
            }
            Err(e) => {
                warn!("malformed ACK from peer {}: {e}", peer.processor_id);
                RecvAction::None
            }
        },
        MsgType::Nack => match crate::wire::unpack_seq_payload(&frame.payload) {
            Ok(seq) => RecvAction::Retransmit(seq),
            Err(e) => {
                warn!("malformed NACK from peer {}: {e}", peer.processor_id);
                RecvAction::None
            }
        },
        MsgType::Heartbeat | MsgType::Announce => RecvAction::None,
        MsgType::Subscribe | MsgType::Unsubscribe => {
            // Parsing the MID/QoS list and calling the distributor is the
            // scheduler's job (it owns the bus + remap context); this
            // pipeline only handles the message types that are purely
            // peer-local bookkeeping.
            RecvAction::None
        }
        MsgType::App => handle_app(peer, bus, ctx, &frame.payload),
        MsgType::NoMsg => RecvAction::None,
    }
}

fn handle_protocol(payload: &[u8]) -> RecvAction {
    match crate::wire::unpack_version_id(payload) {
        Ok(id) if id == crate::VERSION_ID => RecvAction::None,
        Ok(id) => {
            warn!("peer reported incompatible version identifier '{id}'");
            RecvAction::ProtocolIncompatible
        }
        Err(e) => {
            warn!("malformed PROTOCOL payload: {e}");
            RecvAction::ProtocolIncompatible
        }
    }
}

fn handle_app(peer: &Peer, bus: &dyn SoftwareBus, ctx: &FilterContext, payload: &[u8]) -> RecvAction {
    let (seq, mid, app_payload) = match crate::wire::unpack_app_envelope(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("malformed APP payload from peer {}: {e}", peer.processor_id);
            return RecvAction::None;
        }
    };

    // Ordering keys only on the sequence number; the MID rides alongside
    // each buffered (deferred or in-order) payload so drained entries
    // still know what to publish as.
    let (outcome, next_expected) = peer.accept_recv_seq(seq, crate::wire::pack_app_envelope(0, mid, app_payload));
    match outcome {
        RecvOrderingOutcome::Duplicate => RecvAction::None,
        RecvOrderingOutcome::Deferred => {
            peer.counters.record_missed();
            RecvAction::SendNack(next_expected)
        }
        RecvOrderingOutcome::InOrder => {
            filter_and_publish(peer, bus, ctx, mid, app_payload.to_vec());
            for (_, deferred) in peer.drain_deferred_ready() {
                if let Ok((_, deferred_mid, deferred_payload)) = crate::wire::unpack_app_envelope(&deferred) {
                    filter_and_publish(peer, bus, ctx, deferred_mid, deferred_payload.to_vec());
                }
            }
            match peer.take_ack_if_due(ACK_THRESHOLD) {
                Some(last_accepted) => RecvAction::SendAck(last_accepted),
                None => RecvAction::None,
            }
        }
    }
}

fn filter_and_publish(peer: &Peer, bus: &dyn SoftwareBus, ctx: &FilterContext, mid: crate::mid::Mid, mut payload: Vec<u8>) {
    match run_recv_chain(&peer.filters, &mut payload, ctx) {
        FilterResult::Success => {
            if let Err(e) = bus.publish(SbMessage::from_peer(mid, payload, peer.processor_id)) {
                warn!("failed to publish message from peer {}: {e}", peer.processor_id);
            }
        }
        FilterResult::IfEmpty => {}
        FilterResult::Error(reason) => {
            warn!("recv filter dropped message from peer {}: {reason}", peer.processor_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Direction;
    use crate::loopback::LoopbackBus;
    use crate::mid::Mid;
    use crate::sb::PipePayload;
    use std::time::Duration;

    fn ctx() -> FilterContext {
        FilterContext {
            processor_id: 5,
            spacecraft_id: 1,
            direction: Direction::Recv,
        }
    }

    fn app_frame(seq: u32, mid: Mid, payload: &[u8]) -> RecvFrame {
        RecvFrame {
            msg_type: MsgType::App,
            processor_id: 5,
            payload: crate::wire::pack_app_envelope(seq, mid, payload),
        }
    }

    #[test]
    fn in_order_app_message_is_published_and_does_not_nack() {
        let peer = Peer::new(5, 1, Vec::new(), 8, 8, 8);
        peer.mark_connected(crate::sb::PipeId(1));
        let bus = LoopbackBus::new();
        let sub_pipe = bus.create_pipe("consumer", 8).unwrap();
        bus.subscribe_local(sub_pipe, Mid(0), 8).unwrap();

        let action = handle_frame(&peer, &bus, &ctx(), app_frame(0, Mid(0), b"hi"));
        assert_eq!(action, RecvAction::None);
        assert!(matches!(
            bus.receive(sub_pipe, Some(Duration::from_millis(20))),
            Some(PipePayload::App(_))
        ));
    }

    #[test]
    fn out_of_order_app_message_triggers_nack() {
        let peer = Peer::new(5, 1, Vec::new(), 8, 8, 8);
        peer.mark_connected(crate::sb::PipeId(1));
        let bus = LoopbackBus::new();

        let action = handle_frame(&peer, &bus, &ctx(), app_frame(3, Mid(0), b"hi"));
        assert_eq!(action, RecvAction::SendNack(0));
        assert_eq!(peer.counters.snapshot().missed, 1);
    }

    #[test]
    fn ack_frame_clears_send_ring_through_sequence() {
        let peer = Peer::new(5, 1, Vec::new(), 8, 8, 8);
        peer.mark_connected(crate::sb::PipeId(1));
        peer.store_sent_frame(0, vec![1]);
        peer.store_sent_frame(1, vec![2]);
        let bus = LoopbackBus::new();

        let frame = RecvFrame {
            msg_type: MsgType::Ack,
            processor_id: 5,
            payload: crate::wire::pack_seq_payload(0).to_vec(),
        };
        handle_frame(&peer, &bus, &ctx(), frame);
        assert!(peer.take_for_retransmit(0, 10).is_none());
        assert!(peer.take_for_retransmit(1, 10).is_some());
    }

    #[test]
    fn nack_frame_requests_retransmit_of_named_sequence() {
        let peer = Peer::new(5, 1, Vec::new(), 8, 8, 8);
        peer.mark_connected(crate::sb::PipeId(1));
        let bus = LoopbackBus::new();

        let frame = RecvFrame {
            msg_type: MsgType::Nack,
            processor_id: 5,
            payload: crate::wire::pack_seq_payload(4).to_vec(),
        };
        let action = handle_frame(&peer, &bus, &ctx(), frame);
        assert_eq!(action, RecvAction::Retransmit(4));
    }
}
