//! Scheduler (spec.md §4.8, C8): the main loop that drives subscription
//! fan-out, per-net polling, receive dispatch, send draining, and peer
//! timeout detection.
//!
//! Grounded in the teacher's `EventLoop` (`event_loop_msg.rs`'s sibling,
//! the mio-driven reactor `socket_impl.rs` feeds) in spirit only: SBN has
//! no async reactor to register with (protocol modules own their own
//! sockets), so `tick()` plays the role of one reactor iteration, called
//! either inline in a loop by a caller that wants everything on one
//! thread, or from per-net/per-peer background threads spawned by
//! `spawn_dedicated_tasks` for nets/peers whose `TaskFlags` ask for a
//! dedicated task instead of inline polling (spec.md §4.8 task taxonomy).
//!
//! UDP carries no connection state of its own (`protocol::udp::UdpModule
//! ::poll_peer` is a documented no-op), so nothing ever calls
//! `Outlet::connected` for a UDP peer. The scheduler closes that gap
//! itself: the first valid frame received from a peer that is not yet
//! CONNECTED is treated as an implicit connect, mirroring how a real UDP
//! transport has no handshake to observe and must infer liveness from
//! traffic. Peers whose module *does* report `connected()` explicitly
//! (TCP, on accept/connect) are already CONNECTED by the time their
//! first frame arrives, so the implicit path is a no-op for them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;

use crate::app::App;
use crate::config::AppConfig;
use crate::distributor;
use crate::error::{SbnError, SbnResult};
use crate::filter::{Direction, FilterContext};
use crate::mid::{Mid, Qos};
use crate::net::{Net, TaskFlags};
use crate::peer::Peer;
use crate::protocol::{RecvFrame, RecvShape};
use crate::recv_pipeline::{self, RecvAction};
use crate::sb::{PipePayload, SubscriptionReport};
use crate::send_pipeline::{self, SendOutcome};
use crate::wire::{pack_seq_payload, MsgType};

fn parse_subscribe_payload(payload: &[u8]) -> SbnResult<(Mid, Qos)> {
    if payload.len() < 5 {
        return Err(SbnError::Protocol("subscribe payload shorter than 5 bytes".into()));
    }
    let mid = Mid(u32::from_be_bytes(payload[0..4].try_into().unwrap()));
    Ok((mid, Qos::from_raw(payload[4])))
}

fn parse_unsubscribe_payload(payload: &[u8]) -> SbnResult<Mid> {
    if payload.len() < 4 {
        return Err(SbnError::Protocol("unsubscribe payload shorter than 4 bytes".into()));
    }
    Ok(Mid(u32::from_be_bytes(payload[0..4].try_into().unwrap())))
}

/// Drives one `App`'s nets. `tick()` services every net flagged `POLL`
/// inline; `spawn_dedicated_tasks` hands the rest off to background
/// threads. A caller mixing both calls `tick()` in its own loop alongside
/// the handles `spawn_dedicated_tasks` returns.
pub struct Scheduler {
    app: Arc<App>,
    /// `(net_id, processor_id)` pairs configured with `SEND_TASK`; `tick`
    /// skips draining sends for these inline since a dedicated thread
    /// already owns that peer's outbound pipe.
    peer_send_task: HashSet<(u32, u32)>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// `config` is consulted only to read each peer's `TaskFlags` (the
    /// live `Peer` object doesn't retain them, since nothing else needs
    /// them after the scheduler is wired up); pass a clone of whatever
    /// `AppConfig` was given to `App::new`.
    pub fn new(app: Arc<App>, config: &AppConfig) -> Scheduler {
        let peer_send_task = config
            .peers
            .iter()
            .filter(|p| p.task_flags().contains(TaskFlags::SEND_TASK))
            .map(|p| (p.net_number, p.processor_id))
            .collect();
        Scheduler {
            app,
            peer_send_task,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the flag `spawn_dedicated_tasks`' threads watch; call
    /// `request_shutdown` (or store through this handle directly) to ask
    /// them to exit after their current wakeup.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One iteration: drains local subscription reports, then services
    /// every net flagged `POLL`. Nets flagged `RECV_TASK` instead are
    /// left alone here; `spawn_dedicated_tasks` drives those.
    pub fn tick(&self) {
        self.drain_subscription_reports();
        for net in &self.app.nets {
            if net.task_flags.contains(TaskFlags::POLL) {
                self.service_net(net);
            }
        }
    }

    /// Drains the subscription-report pipe (spec.md §4.5) and fans each
    /// resulting local-set change out to every net's connected peers.
    fn drain_subscription_reports(&self) {
        loop {
            let report = match self.app.bus.receive(self.app.sub_pipe, Some(Duration::ZERO)) {
                Some(PipePayload::Sub(report)) => report,
                Some(PipePayload::App(_)) | None => return,
            };

            let mut table = self.app.local_subs.lock().unwrap();
            match report {
                SubscriptionReport::Subscribed(entry) => {
                    let fanout = distributor::apply_local_subscribe(&mut table, entry.mid, entry.qos);
                    drop(table);
                    self.fan_out(fanout);
                }
                SubscriptionReport::Unsubscribed(entry) => {
                    let fanout = distributor::apply_local_unsubscribe(&mut table, entry.mid);
                    drop(table);
                    self.fan_out(fanout);
                }
                SubscriptionReport::Snapshot(entries) => {
                    for entry in entries {
                        let fanout = distributor::apply_local_subscribe(&mut table, entry.mid, entry.qos);
                        // Applied inline; a reload's snapshot is expected
                        // to be fanned out in full regardless of whether
                        // each individual MID was already known locally.
                        if fanout != distributor::LocalFanout::None {
                            for net in &self.app.nets {
                                distributor::fan_out_local_change(net, fanout);
                            }
                        }
                    }
                }
            }
        }
    }

    fn fan_out(&self, fanout: distributor::LocalFanout) {
        if fanout == distributor::LocalFanout::None {
            return;
        }
        for net in &self.app.nets {
            distributor::fan_out_local_change(net, fanout);
        }
    }

    fn service_net(&self, net: &Net) {
        for peer in &net.peers {
            net.protocol.poll_peer(net.net_id, peer.processor_id);
        }

        match net.protocol.recv_shape() {
            RecvShape::PerNet => self.drain_per_net(net),
            RecvShape::PerPeer => self.drain_per_peer(net),
        }

        for peer in &net.peers {
            self.check_peer_timeout(peer);
            self.maybe_send_heartbeat(net, peer);
            if peer.is_connected() && !self.peer_send_task.contains(&(net.net_id, peer.processor_id)) {
                self.drain_sends(net, peer);
            }
        }
        net.connected_peer_count();
    }

    /// Emits a HEARTBEAT to `peer` once `heartbeat_interval_ms` has
    /// elapsed since anything was last sent to it — including while it
    /// is still DISCONNECTED. This is what lets two UDP peers ever meet
    /// in the first place: `UdpModule::poll_peer` reports no connection
    /// state of its own, so without some outbound traffic neither side's
    /// `recv_from_net` would ever see a first frame to implicitly
    /// connect on. Disabled when `heartbeat_interval_ms` is 0 (spec.md
    /// §4.4: "either may be zero, in which case the corresponding
    /// behavior is disabled").
    fn maybe_send_heartbeat(&self, net: &Net, peer: &Peer) {
        let interval = self.app.tunables.heartbeat_interval_ms;
        if interval == 0 {
            return;
        }
        let last_send = peer.counters.snapshot().last_send_unix_ms;
        if now_unix_ms().saturating_sub(last_send) < interval {
            return;
        }
        let sent = {
            let _guard = net.send_lock.lock().unwrap();
            net.protocol.send(net.net_id, peer.processor_id, MsgType::Heartbeat, &[])
        };
        match sent {
            Ok(_) => peer.counters.record_send(),
            Err(e) => warn!("heartbeat to peer {} failed: {e}", peer.processor_id),
        }
    }

    fn drain_per_net(&self, net: &Net) {
        for _ in 0..self.app.tunables.max_recv_per_wakeup {
            match net.protocol.recv_from_net(net.net_id) {
                Ok(Some(frame)) => self.handle_incoming(net, frame),
                Ok(None) => break,
                Err(e) => {
                    warn!("net {} recv error: {e}", net.name);
                    break;
                }
            }
        }
    }

    fn drain_per_peer(&self, net: &Net) {
        for peer in &net.peers {
            for _ in 0..self.app.tunables.max_recv_per_wakeup {
                match net.protocol.recv_from_peer(net.net_id, peer.processor_id) {
                    Ok(Some(frame)) => self.handle_incoming(net, frame),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("recv from peer {} failed: {e}", peer.processor_id);
                        peer.counters.record_recv_err();
                        if peer.is_connected() {
                            self.app.on_disconnected(peer.processor_id);
                        }
                        break;
                    }
                }
            }
        }
    }

    fn handle_incoming(&self, net: &Net, frame: RecvFrame) {
        let Some(peer) = net.peer(frame.processor_id) else {
            warn!("net {} received a frame from unconfigured peer {}", net.name, frame.processor_id);
            return;
        };

        if !peer.is_connected() {
            self.app.on_connected(frame.processor_id);
        }

        if matches!(frame.msg_type, MsgType::Subscribe | MsgType::Unsubscribe) {
            self.handle_subscription_frame(net, peer, frame);
        } else {
            self.handle_regular_frame(net, peer, frame);
        }
    }

    fn handle_subscription_frame(&self, net: &Net, peer: &Peer, frame: RecvFrame) {
        let Some(pipe) = peer.outbound_pipe() else {
            return;
        };
        let ctx = FilterContext {
            processor_id: peer.processor_id,
            spacecraft_id: peer.spacecraft_id,
            direction: Direction::Recv,
        };

        match frame.msg_type {
            MsgType::Subscribe => match parse_subscribe_payload(&frame.payload) {
                Ok((mid, qos)) => distributor::apply_peer_subscribe(peer, self.app.bus.as_ref(), pipe, mid, qos, &ctx),
                Err(e) => warn!("malformed SUBSCRIBE from peer {}: {e}", peer.processor_id),
            },
            MsgType::Unsubscribe => match parse_unsubscribe_payload(&frame.payload) {
                Ok(mid) => distributor::apply_peer_unsubscribe(peer, self.app.bus.as_ref(), pipe, mid, &ctx),
                Err(e) => warn!("malformed UNSUBSCRIBE from peer {}: {e}", peer.processor_id),
            },
            _ => unreachable!("only called for Subscribe/Unsubscribe frames"),
        }
        let _ = net;
    }

    fn handle_regular_frame(&self, net: &Net, peer: &Peer, frame: RecvFrame) {
        let ctx = FilterContext {
            processor_id: peer.processor_id,
            spacecraft_id: peer.spacecraft_id,
            direction: Direction::Recv,
        };

        match recv_pipeline::handle_frame(peer, self.app.bus.as_ref(), &ctx, frame) {
            RecvAction::None => {}
            RecvAction::SendNack(seq) => self.send_control(net, peer, MsgType::Nack, pack_seq_payload(seq).to_vec()),
            RecvAction::SendAck(seq) => self.send_control(net, peer, MsgType::Ack, pack_seq_payload(seq).to_vec()),
            RecvAction::Retransmit(seq) => {
                if net.protocol.reliable() {
                    send_pipeline::retransmit(net, peer, seq, self.app.tunables.retransmit_ceiling);
                }
            }
            RecvAction::ProtocolIncompatible => {
                warn!("peer {} reported an incompatible protocol version; dropping its traffic", peer.processor_id);
            }
        }
    }

    fn send_control(&self, net: &Net, peer: &Peer, msg_type: MsgType, payload: Vec<u8>) {
        let _guard = net.send_lock.lock().unwrap();
        if let Err(e) = net.protocol.send(net.net_id, peer.processor_id, msg_type, &payload) {
            warn!("failed to send {msg_type:?} to peer {}: {e}", peer.processor_id);
        }
    }

    fn drain_sends(&self, net: &Net, peer: &Peer) {
        let Some(pipe) = peer.outbound_pipe() else {
            return;
        };
        let ctx = FilterContext {
            processor_id: peer.processor_id,
            spacecraft_id: peer.spacecraft_id,
            direction: Direction::Send,
        };

        for _ in 0..self.app.tunables.max_drain_per_wakeup {
            match send_pipeline::drain_and_send_one(net, peer, self.app.bus.as_ref(), pipe, &ctx, Some(Duration::ZERO)) {
                SendOutcome::Sent | SendOutcome::FilteredOut => continue,
                SendOutcome::Empty => break,
                SendOutcome::Fatal => {
                    self.app.on_disconnected(peer.processor_id);
                    break;
                }
            }
        }
    }

    fn check_peer_timeout(&self, peer: &Peer) {
        let timeout_ms = self.app.tunables.peer_timeout_ms;
        if timeout_ms == 0 || !peer.is_connected() {
            return;
        }
        let last_recv = peer.counters.snapshot().last_recv_unix_ms;
        if now_unix_ms().saturating_sub(last_recv) > timeout_ms {
            warn!("peer {} timed out after {timeout_ms}ms of silence", peer.processor_id);
            self.app.on_disconnected(peer.processor_id);
        }
    }

    /// Spawns one thread per net flagged `RECV_TASK` and one per peer
    /// flagged `SEND_TASK` (spec.md §4.8). `tick()` remains the caller's
    /// responsibility for every `POLL`-flagged net; these threads cover
    /// the rest.
    pub fn spawn_dedicated_tasks(self: &Arc<Scheduler>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for net_index in 0..self.app.nets.len() {
            if self.app.nets[net_index].task_flags.contains(TaskFlags::RECV_TASK) {
                let scheduler = Arc::clone(self);
                handles.push(thread::spawn(move || scheduler.run_recv_task(net_index)));
            }
        }

        for &(net_id, processor_id) in &self.peer_send_task {
            let scheduler = Arc::clone(self);
            handles.push(thread::spawn(move || scheduler.run_send_task(net_id, processor_id)));
        }

        handles
    }

    fn run_recv_task(&self, net_index: usize) {
        let net = &self.app.nets[net_index];
        let wakeup = Duration::from_millis(self.app.tunables.wakeup_period_ms.max(1));
        while !self.is_shutting_down() {
            for peer in &net.peers {
                net.protocol.poll_peer(net.net_id, peer.processor_id);
            }
            match net.protocol.recv_shape() {
                RecvShape::PerNet => self.drain_per_net(net),
                RecvShape::PerPeer => self.drain_per_peer(net),
            }
            for peer in &net.peers {
                self.check_peer_timeout(peer);
                self.maybe_send_heartbeat(net, peer);
            }
            thread::sleep(wakeup);
        }
    }

    fn run_send_task(&self, net_id: u32, processor_id: u32) {
        let Some(net) = self.app.nets.iter().find(|n| n.net_id == net_id) else {
            warn!("send task for unknown net {net_id} exiting immediately");
            return;
        };
        let Some(peer) = net.peer(processor_id) else {
            warn!("send task for unknown peer {processor_id} on net {net_id} exiting immediately");
            return;
        };
        let wakeup = Duration::from_millis(self.app.tunables.wakeup_period_ms.max(1));

        while !self.is_shutting_down() {
            let Some(pipe) = peer.outbound_pipe() else {
                thread::sleep(wakeup);
                continue;
            };
            let ctx = FilterContext {
                processor_id,
                spacecraft_id: peer.spacecraft_id,
                direction: Direction::Send,
            };
            match send_pipeline::drain_and_send_one(net, peer, self.app.bus.as_ref(), pipe, &ctx, Some(wakeup)) {
                SendOutcome::Fatal => {
                    self.app.on_disconnected(processor_id);
                    thread::sleep(wakeup);
                }
                SendOutcome::Sent | SendOutcome::FilteredOut | SendOutcome::Empty => {}
            }
        }
    }
}

fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
