//! Subscription distributor (spec.md §4.5, C9).
//!
//! Split into two entry points matching the spec's two independent flows:
//! `apply_local_report` processes what the local SB tells us about local
//! apps' subscriptions, `apply_peer_subscribe`/`apply_peer_unsubscribe`
//! process what a specific peer advertises. Both are driven by the
//! scheduler's main loop and a peer's recv pipeline respectively, and
//! both ultimately touch only `LocalSubscriptionTable`/`PeerSubscriptionTable`
//! plus the `SoftwareBus` boundary — no wire I/O happens here.

use log::warn;

use crate::filter::{run_remap_chain, Direction, FilterContext};
use crate::mid::{Mid, Qos};
use crate::net::Net;
use crate::peer::Peer;
use crate::sb::{PipeId, SbMessage, SoftwareBus};
use crate::subscription::LocalSubscriptionTable;

/// What the caller must do in response to a local subscription change:
/// fan a SUBSCRIBE/UNSUBSCRIBE out to every connected peer on every net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFanout {
    None,
    Subscribe(Mid, Qos),
    Unsubscribe(Mid),
}

/// Applies one local SUBSCRIBE report (spec.md §4.5 "Local set").
pub fn apply_local_subscribe(table: &mut LocalSubscriptionTable, mid: Mid, qos: Qos) -> LocalFanout {
    match table.subscribe(mid, qos) {
        Ok(true) => LocalFanout::Subscribe(mid, qos),
        Ok(false) => LocalFanout::None,
        Err(e) => {
            warn!("local subscription table rejected {mid}: {e}");
            LocalFanout::None
        }
    }
}

/// Applies one local UNSUBSCRIBE report (spec.md §4.5 "Local set").
pub fn apply_local_unsubscribe(table: &mut LocalSubscriptionTable, mid: Mid) -> LocalFanout {
    if table.unsubscribe(mid) {
        LocalFanout::Unsubscribe(mid)
    } else {
        LocalFanout::None
    }
}

/// Fans a local subscription change out to every CONNECTED peer on `net`
/// as a non-sequence-numbered SUBSCRIBE/UNSUBSCRIBE frame (spec.md §4.6:
/// "Subscription advertisements ... are sent through the same path but
/// are NOT sequence-numbered").
pub fn fan_out_local_change(net: &Net, fanout: LocalFanout) {
    use crate::wire::MsgType;

    let (msg_type, payload) = match fanout {
        LocalFanout::None => return,
        LocalFanout::Subscribe(mid, qos) => (MsgType::Subscribe, subscribe_payload(mid, qos)),
        LocalFanout::Unsubscribe(mid) => (MsgType::Unsubscribe, unsubscribe_payload(mid)),
    };
    let _guard = net.send_lock.lock().unwrap();
    for peer in net.peers.iter().filter(|p| p.is_connected()) {
        if let Err(e) = net.protocol.send(net.net_id, peer.processor_id, msg_type, &payload) {
            warn!("failed to advertise subscription change to peer {}: {e}", peer.processor_id);
        }
    }
}

/// Applies a SUBSCRIBE message received from `peer` (spec.md §4.5
/// "Per-peer set"). Locally subscribes the peer's outbound pipe to `mid`
/// so the bus starts feeding matching publishes into it.
pub fn apply_peer_subscribe(peer: &Peer, bus: &dyn SoftwareBus, pipe: PipeId, mid: Mid, qos: Qos, ctx: &FilterContext) {
    let remapped = match run_remap_chain(&peer.filters, mid, ctx) {
        Ok(Some(mid)) => mid,
        Ok(None) => return,
        Err(e) => {
            warn!("remap filter error on subscribe from {}: {e}", peer.processor_id);
            return;
        }
    };

    match peer.subscribe_peer(remapped, qos) {
        Ok(true) => {
            if let Err(e) = bus.subscribe_local(pipe, remapped, u32::MAX) {
                warn!("failed to subscribe peer {} outbound pipe to {remapped}: {e}", peer.processor_id);
            }
            peer.counters.set_sub_count(peer.peer_subscription_count());
        }
        Ok(false) => warn!("peer {} re-advertised already-subscribed {remapped}", peer.processor_id),
        Err(e) => warn!("peer {} subscription rejected for {remapped}: {e}", peer.processor_id),
    }
}

/// Applies an UNSUBSCRIBE message received from `peer`.
pub fn apply_peer_unsubscribe(peer: &Peer, bus: &dyn SoftwareBus, pipe: PipeId, mid: Mid, ctx: &FilterContext) {
    let remapped = match run_remap_chain(&peer.filters, mid, ctx) {
        Ok(Some(mid)) => mid,
        Ok(None) => return,
        Err(e) => {
            warn!("remap filter error on unsubscribe from {}: {e}", peer.processor_id);
            return;
        }
    };

    if peer.unsubscribe_peer(remapped) {
        bus.unsubscribe_local(pipe, remapped);
        peer.counters.set_sub_count(peer.peer_subscription_count());
    }
}

/// Builds the burst of SUBSCRIBE frames advertising the full local set
/// to a peer that just connected (spec.md §4.4 "emit the local
/// subscription set to the peer as a burst of SUBSCRIBE messages").
pub fn local_set_as_subscribe_frames(table: &LocalSubscriptionTable) -> Vec<(Mid, Qos)> {
    table.iter().collect()
}

/// Converts one entry into the wire payload for a SUBSCRIBE/UNSUBSCRIBE
/// frame: the 4-byte MID followed by the QoS byte (UNSUBSCRIBE frames
/// omit the QoS byte since a peer only needs to know which MID to drop).
pub fn subscribe_payload(mid: Mid, qos: Qos) -> Vec<u8> {
    let mut payload = mid.0.to_be_bytes().to_vec();
    payload.push(qos.raw());
    payload
}

pub fn unsubscribe_payload(mid: Mid) -> Vec<u8> {
    mid.0.to_be_bytes().to_vec()
}

/// Re-injects a message destined for a connected peer's outbound pipe —
/// not part of distribution proper, but colocated since `apply_peer_subscribe`
/// is the only place a pipe gets wired to a MID; kept here for callers
/// that want to seed test fixtures without going through the full send
/// pipeline.
#[cfg(test)]
pub fn publish_for_tests(bus: &dyn SoftwareBus, mid: Mid, payload: Vec<u8>) {
    let _ = bus.publish(SbMessage::new(mid, payload));
}
