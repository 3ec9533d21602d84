//! TCP protocol module, grounded in `modules/tcp/fsw/src/sbn_tcp_if.c`.
//!
//! The C module binds one listening socket per net (the entry whose
//! processor id matches the local CPU) and one outbound stream per peer
//! (the remaining entries), reconnecting opportunistically. This keeps
//! that shape: `init_net` binds and listens; `poll_peer` both accepts
//! pending inbound connections on the net's listener and, for peers
//! with no live stream yet, attempts an outbound connect. TCP already
//! orders and retransmits at the transport layer, so per the resolved
//! ambiguity in SPEC_FULL.md this module reports itself non-reliable:
//! running the core's SendRing/ACK/NACK machinery on top would be
//! redundant.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{SbnError, SbnResult};
use crate::protocol::{Outlet, ProtocolModule, RecvFrame, RecvShape};
use crate::wire::{pack_frame, unpack_header, MsgType, HEADER_LEN};

struct NetState {
    listener: TcpListener,
}

struct PeerState {
    address: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    recv_buf: Mutex<Vec<u8>>,
}

#[derive(Default)]
pub struct TcpModule {
    outlet: OnceLock<Arc<dyn Outlet>>,
    local_processor_id: OnceLock<u32>,
    pending_nets: Mutex<HashMap<u32, String>>,
    nets: Mutex<HashMap<u32, NetState>>,
    peers: Mutex<HashMap<(u32, u32), PeerState>>,
}

impl TcpModule {
    pub fn new() -> TcpModule {
        TcpModule::default()
    }

    fn local_processor_id(&self) -> SbnResult<u32> {
        self.local_processor_id
            .get()
            .copied()
            .ok_or_else(|| SbnError::Configuration("tcp module used before init_module".into()))
    }

    /// Accepts any pending inbound connections on `net`'s listener and
    /// adopts one for whichever configured peer matches its source
    /// address, if that peer has no live stream yet.
    fn accept_pending(&self, net: u32) {
        let nets = self.nets.lock().unwrap();
        let Some(state) = nets.get(&net) else { return };
        loop {
            match state.listener.accept() {
                Ok((stream, addr)) => {
                    let peers = self.peers.lock().unwrap();
                    let matched = peers
                        .iter()
                        .find(|((n, _), p)| *n == net && p.address.ip() == addr.ip());
                    if let Some(((_, peer_id), peer_state)) = matched {
                        let _ = stream.set_nonblocking(true);
                        *peer_state.stream.lock().unwrap() = Some(stream);
                        if let Some(outlet) = self.outlet.get() {
                            outlet.connected(*peer_id);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

impl ProtocolModule for TcpModule {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn reliable(&self) -> bool {
        false
    }

    fn recv_shape(&self) -> RecvShape {
        RecvShape::PerPeer
    }

    fn init_module(
        &self,
        protocol_version: u32,
        _base_event_id: u32,
        local_processor_id: u32,
        outlet: Arc<dyn Outlet>,
    ) -> SbnResult<()> {
        if protocol_version != 1 {
            return Err(SbnError::Configuration(format!(
                "tcp module supports protocol version 1, got {protocol_version}"
            )));
        }
        let _ = self.outlet.set(outlet);
        let _ = self.local_processor_id.set(local_processor_id);
        Ok(())
    }

    fn load_net(&self, net: u32, address: &str) -> SbnResult<()> {
        self.pending_nets.lock().unwrap().insert(net, address.to_owned());
        Ok(())
    }

    fn init_net(&self, net: u32) -> SbnResult<()> {
        let address = self
            .pending_nets
            .lock()
            .unwrap()
            .remove(&net)
            .ok_or_else(|| SbnError::Configuration(format!("tcp net {net} has no loaded address")))?;
        let listener = TcpListener::bind(&address).map_err(|source| SbnError::Transport { peer: net, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| SbnError::Transport { peer: net, source })?;
        self.nets.lock().unwrap().insert(net, NetState { listener });
        Ok(())
    }

    fn unload_net(&self, net: u32) -> SbnResult<()> {
        self.nets.lock().unwrap().remove(&net);
        self.pending_nets.lock().unwrap().remove(&net);
        Ok(())
    }

    fn load_peer(&self, net: u32, peer: u32, address: &str) -> SbnResult<()> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| SbnError::Configuration(format!("invalid tcp peer address '{address}'")))?;
        self.peers.lock().unwrap().insert(
            (net, peer),
            PeerState {
                address: addr,
                stream: Mutex::new(None),
                recv_buf: Mutex::new(Vec::new()),
            },
        );
        Ok(())
    }

    fn init_peer(&self, _net: u32, _peer: u32) -> SbnResult<()> {
        Ok(())
    }

    fn unload_peer(&self, net: u32, peer: u32) -> SbnResult<()> {
        self.peers.lock().unwrap().remove(&(net, peer));
        Ok(())
    }

    fn send(&self, net: u32, peer: u32, msg_type: MsgType, payload: &[u8]) -> SbnResult<usize> {
        let local_id = self.local_processor_id()?;
        let peers = self.peers.lock().unwrap();
        let state = peers
            .get(&(net, peer))
            .ok_or_else(|| SbnError::Configuration(format!("tcp peer {peer} on net {net} not loaded")))?;
        let mut stream_guard = state.stream.lock().unwrap();
        let stream = stream_guard
            .as_mut()
            .ok_or_else(|| SbnError::Transport {
                peer,
                source: std::io::Error::new(ErrorKind::NotConnected, "no live tcp stream for peer"),
            })?;
        let frame = pack_frame(msg_type, local_id, 0, payload)?;
        let result = stream.write_all(&frame).and_then(|_| stream.flush());
        match result {
            Ok(()) => Ok(frame.len()),
            Err(source) => {
                *stream_guard = None;
                Err(SbnError::Transport { peer, source })
            }
        }
    }

    fn recv_from_peer(&self, net: u32, peer: u32) -> SbnResult<Option<RecvFrame>> {
        let peers = self.peers.lock().unwrap();
        let state = peers
            .get(&(net, peer))
            .ok_or_else(|| SbnError::Configuration(format!("tcp peer {peer} on net {net} not loaded")))?;
        let mut stream_guard = state.stream.lock().unwrap();
        let Some(stream) = stream_guard.as_mut() else {
            return Ok(None);
        };

        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    *stream_guard = None;
                    return Err(SbnError::Transport {
                        peer,
                        source: std::io::Error::new(ErrorKind::UnexpectedEof, "peer closed tcp connection"),
                    });
                }
                Ok(n) => state.recv_buf.lock().unwrap().extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(source) => {
                    *stream_guard = None;
                    return Err(SbnError::Transport { peer, source });
                }
            }
        }

        let mut buf = state.recv_buf.lock().unwrap();
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = unpack_header(&buf)?;
        let frame_len = HEADER_LEN + header.payload_size as usize;
        if buf.len() < frame_len {
            return Ok(None);
        }
        let payload = buf[HEADER_LEN..frame_len].to_vec();
        buf.drain(0..frame_len);
        Ok(Some(RecvFrame {
            msg_type: header.msg_type,
            processor_id: peer,
            payload,
        }))
    }

    fn poll_peer(&self, net: u32, peer: u32) {
        self.accept_pending(net);

        let needs_connect = {
            let peers = self.peers.lock().unwrap();
            match peers.get(&(net, peer)) {
                Some(state) => state.stream.lock().unwrap().is_none(),
                None => return,
            }
        };
        if !needs_connect {
            return;
        }
        let address = {
            let peers = self.peers.lock().unwrap();
            match peers.get(&(net, peer)) {
                Some(state) => state.address,
                None => return,
            }
        };
        if let Ok(stream) = TcpStream::connect(address) {
            let _ = stream.set_nonblocking(true);
            let peers = self.peers.lock().unwrap();
            if let Some(state) = peers.get(&(net, peer)) {
                *state.stream.lock().unwrap() = Some(stream);
            }
            if let Some(outlet) = self.outlet.get() {
                outlet.connected(peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NullOutlet {
        connects: AtomicU32,
    }
    impl Outlet for NullOutlet {
        fn connected(&self, _processor_id: u32) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn disconnected(&self, _processor_id: u32) {}
    }

    #[test]
    fn connects_and_round_trips_a_frame() {
        let server = TcpModule::new();
        let client = TcpModule::new();
        let outlet = Arc::new(NullOutlet { connects: AtomicU32::new(0) });
        server.init_module(1, 0, 1, outlet.clone()).unwrap();
        client.init_module(1, 0, 2, outlet).unwrap();

        server.load_net(1, "127.0.0.1:0").unwrap();
        server.init_net(1).unwrap();
        let server_addr = server.nets.lock().unwrap().get(&1).unwrap().listener.local_addr().unwrap();

        server.load_peer(1, 2, &"127.0.0.1:0".parse::<SocketAddr>().unwrap().to_string()).unwrap();
        client.load_peer(1, 1, &server_addr.to_string()).unwrap();

        for _ in 0..100 {
            client.poll_peer(1, 1);
            if client.peers.lock().unwrap().get(&(1, 1)).unwrap().stream.lock().unwrap().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(client
            .peers
            .lock()
            .unwrap()
            .get(&(1, 1))
            .unwrap()
            .stream
            .lock()
            .unwrap()
            .is_some());

        server.poll_peer(1, 2);
        client.send(1, 1, MsgType::App, b"hi").unwrap();

        let mut frame = None;
        for _ in 0..100 {
            server.poll_peer(1, 2);
            if let Some(f) = server.recv_from_peer(1, 2).unwrap() {
                frame = Some(f);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let frame = frame.expect("expected a frame to arrive");
        assert_eq!(frame.payload, b"hi");
    }
}
