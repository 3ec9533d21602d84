//! `Net`: a named collection of peers sharing one protocol module
//! (spec.md §3, §4.8, §5).
//!
//! `send_lock` is the "per-Net mutex serializing calls into its protocol
//! module's send" from §5's shared-resource policy: the send task, any
//! periodic heartbeat/announce traffic, and inline polled sends all take
//! it for the duration of one `ProtocolModule::send` call.

use std::sync::{Arc, Mutex};

use crate::peer::Peer;
use crate::protocol::ProtocolModule;
use crate::telemetry::NetCounters;

bitflags::bitflags! {
    /// Task taxonomy (spec.md §4.8): a 2-bit flag per Net/Peer. Only
    /// `POLL`, `RECV_TASK`, and `RECV_TASK | SEND_TASK` are valid
    /// combinations; `SEND_TASK` without `RECV_TASK` would leave nothing
    /// watching for disconnects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u8 {
        const POLL      = 0b0000_0001;
        const RECV_TASK = 0b0000_0010;
        const SEND_TASK = 0b0000_0100;
    }
}

impl TaskFlags {
    /// Rejects the one invalid combination named in spec.md §4.8.
    pub fn is_valid(self) -> bool {
        !self.contains(TaskFlags::SEND_TASK) || self.contains(TaskFlags::RECV_TASK)
    }
}

pub struct Net {
    pub name: String,
    pub protocol: Arc<dyn ProtocolModule>,
    pub net_id: u32,
    pub task_flags: TaskFlags,
    pub peers: Vec<Arc<Peer>>,
    pub counters: NetCounters,
    /// Serializes calls into `protocol.send` for every peer on this net.
    pub send_lock: Mutex<()>,
    configured: Mutex<bool>,
}

impl Net {
    pub fn new(name: impl Into<String>, net_id: u32, protocol: Arc<dyn ProtocolModule>, task_flags: TaskFlags) -> Net {
        assert!(task_flags.is_valid(), "SEND_TASK requires RECV_TASK");
        Net {
            name: name.into(),
            protocol,
            net_id,
            task_flags,
            peers: Vec::new(),
            counters: NetCounters::new(),
            send_lock: Mutex::new(()),
            configured: Mutex::new(false),
        }
    }

    pub fn add_peer(&mut self, peer: Arc<Peer>) {
        self.peers.push(peer);
        self.counters.set_peer_count(self.peers.len() as u32);
    }

    pub fn peer(&self, processor_id: u32) -> Option<&Arc<Peer>> {
        self.peers.iter().find(|p| p.processor_id == processor_id)
    }

    pub fn is_configured(&self) -> bool {
        *self.configured.lock().unwrap()
    }

    pub fn mark_configured(&self) {
        *self.configured.lock().unwrap() = true;
    }

    pub fn connected_peer_count(&self) -> u32 {
        let count = self.peers.iter().filter(|p| p.is_connected()).count() as u32;
        self.counters.set_connected_peer_count(count);
        count
    }
}
