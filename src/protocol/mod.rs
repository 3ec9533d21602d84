//! Protocol module interface (spec.md §4.2, C2).
//!
//! Grounded in the teacher's `Protocol` trait (`protocol/mod.rs`'s sibling
//! `pbu.rs` implements it for the PUB socket type) and the error-helper
//! style of `global.rs`. Where the teacher's `Protocol` is driven by an
//! `EventLoop` and talks back to its facade over an `SocketNotify` mpsc
//! channel, a protocol module here is driven by the scheduler's blocking
//! task loop and talks back to the core through an `Outlet` — the
//! structural analogue of the teacher's notify sender, narrowed to the
//! two upcalls spec.md §4.2 names.

pub mod tcp;
pub mod udp;

use std::sync::Arc;

use crate::error::SbnResult;
use crate::wire::MsgType;

/// Upcalls a protocol module uses to tell the core about connectivity
/// changes it detects on its own (spec.md §4.2: "The module MAY call the
/// core upcalls `connected(peer)` and `disconnected(peer)`").
pub trait Outlet: Send + Sync {
    fn connected(&self, processor_id: u32);
    fn disconnected(&self, processor_id: u32);
}

/// One frame as read off the wire by `recv_from_net`/`recv_from_peer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvFrame {
    pub msg_type: MsgType,
    pub processor_id: u32,
    pub payload: Vec<u8>,
}

/// Whether a module's transport multiplexes many peers over one net
/// handle (datagram-style) or dedicates a connection per peer
/// (stream-style). Determines which of `recv_from_net`/`recv_from_peer`
/// the scheduler calls (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvShape {
    PerNet,
    PerPeer,
}

/// Capability set a protocol module provides (spec.md §4.2).
///
/// `peer` and `net` addressing is left to the implementation as opaque
/// handles (`u32`) rather than core types, since the module owns their
/// lifecycle; the core only ever passes back a handle it was previously
/// given.
pub trait ProtocolModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// True for transports the core may rely on for ordered reliable
    /// delivery (SendRing/DeferredRing/ACK/NACK machinery); false for
    /// transports where that machinery is redundant or counterproductive
    /// (spec.md §9 resolves this as a per-module capability: UDP is
    /// reliable-capable, TCP is not, since TCP already orders and
    /// retransmits at the transport layer).
    fn reliable(&self) -> bool;

    fn recv_shape(&self) -> RecvShape;

    /// Validates `protocol_version` and stashes `outlet` for later
    /// upcalls. `local_processor_id` is stamped into every frame this
    /// module packs (grounded in `sbn_udp_if.c`'s `SBN_PackMsg(...,
    /// CFE_CPU_ID, ...)` call — packing, and therefore knowledge of the
    /// local processor id, is the module's job, not the core's).
    fn init_module(
        &self,
        protocol_version: u32,
        base_event_id: u32,
        local_processor_id: u32,
        outlet: Arc<dyn Outlet>,
    ) -> SbnResult<()>;

    fn init_net(&self, net: u32) -> SbnResult<()>;
    fn unload_net(&self, net: u32) -> SbnResult<()>;
    fn init_peer(&self, net: u32, peer: u32) -> SbnResult<()>;
    fn unload_peer(&self, net: u32, peer: u32) -> SbnResult<()>;

    /// Parses a protocol-specific address string, e.g. `"127.0.0.1:4000"`.
    fn load_net(&self, net: u32, address: &str) -> SbnResult<()>;
    fn load_peer(&self, net: u32, peer: u32, address: &str) -> SbnResult<()>;

    /// Transmits one already-framed SBN message to `peer`. Returns the
    /// number of bytes written. A connection-fatal error is the caller's
    /// cue to upcall `disconnected`.
    fn send(&self, net: u32, peer: u32, msg_type: MsgType, payload: &[u8]) -> SbnResult<usize>;

    /// Non-blocking poll for one frame from `net` (datagram-style
    /// modules). Returns `Ok(None)` when nothing is available.
    fn recv_from_net(&self, net: u32) -> SbnResult<Option<RecvFrame>> {
        let _ = net;
        Ok(None)
    }

    /// Non-blocking poll for one frame from `peer` (stream-style
    /// modules). Returns `Ok(None)` when nothing is available.
    fn recv_from_peer(&self, net: u32, peer: u32) -> SbnResult<Option<RecvFrame>> {
        let _ = (net, peer);
        Ok(None)
    }

    /// Called periodically; may emit heartbeats/announces/reconnect
    /// attempts and call the outlet's upcalls.
    fn poll_peer(&self, net: u32, peer: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingOutlet {
        connected: AtomicBool,
        disconnected: AtomicBool,
    }

    impl Outlet for RecordingOutlet {
        fn connected(&self, _processor_id: u32) {
            self.connected.store(true, Ordering::SeqCst);
        }
        fn disconnected(&self, _processor_id: u32) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn outlet_upcalls_are_observable() {
        let outlet = RecordingOutlet {
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        };
        outlet.connected(1);
        assert!(outlet.connected.load(Ordering::SeqCst));
        outlet.disconnected(1);
        assert!(outlet.disconnected.load(Ordering::SeqCst));
    }
}
