//! Send pipeline (spec.md §4.6, C6).
//!
//! `drain_and_send_one` does one iteration of "drain up to N messages from
//! the peer's outbound SB pipe" — the scheduler (inline-polled) or a
//! dedicated per-peer send task (blocking) calls it in a loop up to N
//! times per wakeup. Filter chain, sequencing, framing, and SendRing
//! bookkeeping all happen here so both callers share identical behavior.

use log::warn;

use crate::filter::{run_send_chain, FilterContext, FilterResult};
use crate::net::Net;
use crate::peer::Peer;
use crate::sb::{PipePayload, SoftwareBus};
use crate::wire::MsgType;

/// Outcome of attempting to drain and send one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was pending on the pipe.
    Empty,
    Sent,
    /// Dropped by a filter (IF-EMPTY or ERROR); not a transport failure.
    FilteredOut,
    /// The module reported a connection-fatal error; caller should
    /// transition the peer to DISCONNECTED.
    Fatal,
}

/// Drains and sends (at most) one message from `peer`'s outbound pipe.
/// Returns `SendOutcome::Empty` when the pipe has nothing pending within
/// `timeout` (non-blocking peers should pass `Some(Duration::ZERO)`).
pub fn drain_and_send_one(
    net: &Net,
    peer: &Peer,
    bus: &dyn SoftwareBus,
    pipe: crate::sb::PipeId,
    ctx: &FilterContext,
    timeout: Option<std::time::Duration>,
) -> SendOutcome {
    let (mid, mut payload) = match bus.receive(pipe, timeout) {
        Some(PipePayload::App(msg)) => (msg.mid, msg.payload),
        Some(PipePayload::Sub(_)) | None => return SendOutcome::Empty,
    };

    match run_send_chain(&peer.filters, &mut payload, ctx) {
        FilterResult::Success => {}
        FilterResult::IfEmpty => return SendOutcome::FilteredOut,
        FilterResult::Error(reason) => {
            warn!("send filter dropped message for peer {}: {reason}", peer.processor_id);
            return SendOutcome::FilteredOut;
        }
    }

    let seq = peer.next_send_seq();
    let envelope = crate::wire::pack_app_envelope(seq, mid, &payload);

    let send_result = {
        let _guard = net.send_lock.lock().unwrap();
        net.protocol.send(net.net_id, peer.processor_id, MsgType::App, &envelope)
    };

    match send_result {
        Ok(_) => {
            peer.counters.record_send();
            // Retained for NACK-triggered retransmission (spec.md §4.6);
            // the module re-wraps this envelope in a fresh SBN header on
            // resend, the sequence number travels inside the envelope.
            peer.store_sent_frame(seq, envelope);
            SendOutcome::Sent
        }
        Err(e) => {
            peer.counters.record_send_err();
            warn!("send to peer {} failed: {e}", peer.processor_id);
            SendOutcome::Fatal
        }
    }
}

/// Retransmits the SendRing entry for `seq` in response to a NACK, IF
/// present and under the retransmit ceiling (spec.md §4.7). The
/// retransmission reuses the original sequence number.
pub fn retransmit(net: &Net, peer: &Peer, seq: u32, ceiling: u32) -> bool {
    let Some(envelope) = peer.take_for_retransmit(seq, ceiling) else {
        return false;
    };
    // The envelope already carries the original sequence number; the
    // module wraps it in a fresh SBN header, preserving that sequence.
    let _guard = net.send_lock.lock().unwrap();
    match net.protocol.send(net.net_id, peer.processor_id, MsgType::App, &envelope) {
        Ok(_) => {
            peer.counters.record_send();
            true
        }
        Err(e) => {
            warn!("retransmit to peer {} failed: {e}", peer.processor_id);
            peer.counters.record_send_err();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Direction;
    use crate::loopback::LoopbackBus;
    use crate::mid::Mid;
    use crate::net::TaskFlags;
    use crate::protocol::udp::UdpModule;
    use crate::sb::SbMessage;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> FilterContext {
        FilterContext {
            processor_id: 1,
            spacecraft_id: 1,
            direction: Direction::Send,
        }
    }

    #[test]
    fn empty_pipe_yields_empty_outcome() {
        let bus = LoopbackBus::new();
        let pipe = bus.create_pipe("out", 8).unwrap();
        let peer = Peer::new(9, 1, Vec::new(), 8, 8, 8);
        let net = Net::new("n", 0, Arc::new(UdpModule::new()), TaskFlags::POLL);

        let outcome = drain_and_send_one(&net, &peer, &bus, pipe, &ctx(), Some(Duration::from_millis(5)));
        assert_eq!(outcome, SendOutcome::Empty);
    }

    #[test]
    fn send_failure_without_a_loaded_peer_is_fatal_and_counted() {
        let bus = LoopbackBus::new();
        let pipe = bus.create_pipe("out", 8).unwrap();
        bus.subscribe_local(pipe, Mid(1), 8).unwrap();
        bus.publish(SbMessage::new(Mid(1), vec![1, 2, 3])).unwrap();

        let peer = Peer::new(9, 1, Vec::new(), 8, 8, 8);
        let net = Net::new("n", 0, Arc::new(UdpModule::new()), TaskFlags::POLL);

        let outcome = drain_and_send_one(&net, &peer, &bus, pipe, &ctx(), Some(Duration::from_millis(5)));
        assert_eq!(outcome, SendOutcome::Fatal);
        assert_eq!(peer.counters.snapshot().send_err, 1);
    }
}
