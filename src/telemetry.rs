//! Readable counters per spec.md §6: "the core MUST expose readable
//! counters (send, send-err, recv, recv-err, missed, last-send,
//! last-recv, sub-count) per peer." §3 adds the net-level sequence
//! counters (sent, recvd, miss, in-order-since-last-ack) that live
//! alongside a `Peer`.
//!
//! Modeled as plain `Copy` snapshot structs with atomics backing the
//! live counters, mirroring how the teacher's `IdSequence`
//! (`global.rs`) wraps a `Cell` behind a small accessor type rather than
//! exposing the raw counter.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point-in-time copy of one peer's counters, safe to hand to a
/// housekeeping/telemetry consumer without holding any lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerCountersSnapshot {
    pub send: u64,
    pub send_err: u64,
    pub recv: u64,
    pub recv_err: u64,
    pub missed: u64,
    pub last_send_unix_ms: u64,
    pub last_recv_unix_ms: u64,
    pub sub_count: u32,
}

/// Live, thread-safe counters for one peer. `Net`'s recv/send pipeline
/// threads update these concurrently; readers take a snapshot.
#[derive(Debug, Default)]
pub struct PeerCounters {
    send: AtomicU64,
    send_err: AtomicU64,
    recv: AtomicU64,
    recv_err: AtomicU64,
    missed: AtomicU64,
    last_send_unix_ms: AtomicU64,
    last_recv_unix_ms: AtomicU64,
    sub_count: AtomicU32,
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl PeerCounters {
    pub fn new() -> PeerCounters {
        PeerCounters::default()
    }

    pub fn record_send(&self) {
        self.send.fetch_add(1, Ordering::Relaxed);
        self.last_send_unix_ms.store(now_unix_ms(), Ordering::Relaxed);
    }

    pub fn record_send_err(&self) {
        self.send_err.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recv(&self) {
        self.recv.fetch_add(1, Ordering::Relaxed);
        self.last_recv_unix_ms.store(now_unix_ms(), Ordering::Relaxed);
    }

    pub fn record_recv_err(&self) {
        self.recv_err.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missed(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_sub_count(&self, count: u32) {
        self.sub_count.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PeerCountersSnapshot {
        PeerCountersSnapshot {
            send: self.send.load(Ordering::Relaxed),
            send_err: self.send_err.load(Ordering::Relaxed),
            recv: self.recv.load(Ordering::Relaxed),
            recv_err: self.recv_err.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            last_send_unix_ms: self.last_send_unix_ms.load(Ordering::Relaxed),
            last_recv_unix_ms: self.last_recv_unix_ms.load(Ordering::Relaxed),
            sub_count: self.sub_count.load(Ordering::Relaxed),
        }
    }
}

/// Net-level counters: a roll-up used by the "net hk" telemetry surface
/// named in spec.md §6 (out of scope to emit, in scope to expose).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetCountersSnapshot {
    pub peer_count: u32,
    pub connected_peer_count: u32,
}

#[derive(Debug, Default)]
pub struct NetCounters {
    peer_count: AtomicU32,
    connected_peer_count: AtomicU32,
}

impl NetCounters {
    pub fn new() -> NetCounters {
        NetCounters::default()
    }

    pub fn set_peer_count(&self, count: u32) {
        self.peer_count.store(count, Ordering::Relaxed);
    }

    pub fn set_connected_peer_count(&self, count: u32) {
        self.connected_peer_count.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetCountersSnapshot {
        NetCountersSnapshot {
            peer_count: self.peer_count.load(Ordering::Relaxed),
            connected_peer_count: self.connected_peer_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let counters = PeerCounters::new();
        counters.record_send();
        counters.record_send();
        counters.record_recv_err();
        counters.set_sub_count(3);

        let snap = counters.snapshot();
        assert_eq!(snap.send, 2);
        assert_eq!(snap.recv_err, 1);
        assert_eq!(snap.sub_count, 3);
        assert!(snap.last_send_unix_ms > 0);
    }
}
