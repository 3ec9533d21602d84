//! `App`: process-wide owned state (spec.md §9 design note: "Model it as
//! one owned `App` value passed by reference, not a collection of global
//! statics" — the counterpart to the teacher's `Session`/`SocketCollection`
//! split in `socket_facade.rs`/`socket_impl.rs`, collapsed into one type
//! since SBN has no per-caller handle table to multiplex).
//!
//! `App::new` resolves a `config::AppConfig` into live `Net`/`Peer` objects:
//! it instantiates each declared protocol module once, loads/inits every
//! net and peer against it, and resolves each peer's filter chain by name.
//! `AppOutlet` is the `Outlet` a protocol module calls back into; it only
//! holds a `Weak<App>` so a module can be initialized with it before `App`
//! itself exists, the same bootstrapping trick `IdSequence` (`global.rs`)
//! sidesteps by not needing a back-reference at all — SBN's upcalls do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use log::warn;

use crate::config::{AppConfig, Tunables};
use crate::distributor;
use crate::error::{SbnError, SbnResult};
use crate::events::{EventSink, Severity, SbnEvent};
use crate::filter::ccsds_endian::CcsdsEndianFilter;
use crate::filter::remap::RemapFilter;
use crate::filter::FilterModule;
use crate::net::Net;
use crate::peer::Peer;
use crate::protocol::tcp::TcpModule;
use crate::protocol::udp::UdpModule;
use crate::protocol::{Outlet, ProtocolModule};
use crate::remap::{RemapAction, RemapTable};
use crate::sb::{PipeId, SoftwareBus};
use crate::startup;
use crate::subscription::LocalSubscriptionTable;
use crate::wire::MsgType;

fn build_protocol_module(name: &str) -> SbnResult<Arc<dyn ProtocolModule>> {
    match name {
        "udp" => Ok(Arc::new(UdpModule::new())),
        "tcp" => Ok(Arc::new(TcpModule::new())),
        other => Err(SbnError::Configuration(format!("unknown protocol module '{other}'"))),
    }
}

fn build_filter(name: &str, remap_table: &Arc<Mutex<RemapTable>>) -> SbnResult<Box<dyn FilterModule>> {
    match name {
        "remap" => Ok(Box::new(RemapFilter::new(remap_table.clone()))),
        "ccsds_endian" => Ok(Box::new(CcsdsEndianFilter)),
        other => Err(SbnError::Configuration(format!("unknown filter module '{other}'"))),
    }
}

/// The `Outlet` every protocol module upcalls into. Holds only a `Weak`
/// reference, set once `App` itself exists, so `App::new` can hand it to
/// `init_module` before the `Net`/`Peer` graph it needs to search is built.
#[derive(Default)]
struct AppOutlet {
    app: OnceLock<Weak<App>>,
}

impl Outlet for AppOutlet {
    fn connected(&self, processor_id: u32) {
        if let Some(app) = self.app.get().and_then(Weak::upgrade) {
            app.on_connected(processor_id);
        }
    }

    fn disconnected(&self, processor_id: u32) {
        if let Some(app) = self.app.get().and_then(Weak::upgrade) {
            app.on_disconnected(processor_id);
        }
    }
}

pub struct App {
    pub local_processor_id: u32,
    pub local_spacecraft_id: u32,
    pub bus: Arc<dyn SoftwareBus>,
    pub event_sink: Arc<dyn EventSink>,
    pub nets: Vec<Net>,
    pub remap_table: Arc<Mutex<RemapTable>>,
    pub local_subs: Mutex<LocalSubscriptionTable>,
    pub sub_pipe: PipeId,
    pub tunables: Tunables,
}

impl App {
    /// Builds the full `Net`/`Peer` graph from `config` and wires every
    /// protocol module's `Outlet` back to it (spec.md §6 Configuration
    /// table, §4.2 module lifecycle calls).
    pub fn new(config: AppConfig, bus: Arc<dyn SoftwareBus>, event_sink: Arc<dyn EventSink>) -> SbnResult<Arc<App>> {
        let outlet: Arc<AppOutlet> = Arc::default();

        let remap_table = Arc::new(Mutex::new(match &config.remap_table {
            Some(cfg) => {
                let mut table = RemapTable::new(cfg.default_action.into());
                for row in &cfg.rows {
                    table.upsert(row.processor_id, row.from_mid(), row.to_mid());
                }
                table
            }
            None => RemapTable::new(RemapAction::PassThrough),
        }));

        let mut protocol_registry: HashMap<String, Arc<dyn ProtocolModule>> = HashMap::new();
        for module_cfg in &config.protocol_modules {
            let module = build_protocol_module(&module_cfg.name)?;
            module.init_module(1, module_cfg.base_event_id, config.local_processor_id, outlet.clone() as Arc<dyn Outlet>)?;
            protocol_registry.insert(module_cfg.name.clone(), module);
        }

        let mut nets: Vec<Net> = Vec::new();
        for net_cfg in &config.nets {
            let protocol = protocol_registry
                .get(&net_cfg.protocol_name)
                .ok_or_else(|| {
                    SbnError::Configuration(format!(
                        "net {} references undeclared protocol module '{}'",
                        net_cfg.net_number, net_cfg.protocol_name
                    ))
                })?
                .clone();
            protocol.load_net(net_cfg.net_number, &net_cfg.address)?;
            protocol.init_net(net_cfg.net_number)?;
            let mut net = Net::new(format!("net{}", net_cfg.net_number), net_cfg.net_number, protocol, net_cfg.task_flags());
            net.mark_configured();
            nets.push(net);
        }

        for peer_cfg in &config.peers {
            let net = nets
                .iter_mut()
                .find(|n| n.net_id == peer_cfg.net_number)
                .ok_or_else(|| {
                    SbnError::Configuration(format!(
                        "peer {} references undeclared net {}",
                        peer_cfg.processor_id, peer_cfg.net_number
                    ))
                })?;
            if net.protocol.name() != peer_cfg.protocol_name {
                return Err(SbnError::Configuration(format!(
                    "peer {} protocol '{}' does not match net {}'s protocol '{}'",
                    peer_cfg.processor_id,
                    peer_cfg.protocol_name,
                    peer_cfg.net_number,
                    net.protocol.name()
                )));
            }

            let filters = peer_cfg
                .filter_names
                .iter()
                .map(|name| build_filter(name, &remap_table))
                .collect::<SbnResult<Vec<_>>>()?;

            net.protocol.load_peer(peer_cfg.net_number, peer_cfg.processor_id, &peer_cfg.address)?;
            net.protocol.init_peer(peer_cfg.net_number, peer_cfg.processor_id)?;

            let peer = Peer::new(
                peer_cfg.processor_id,
                peer_cfg.spacecraft_id,
                filters,
                config.tunables.send_ring_capacity,
                config.tunables.deferred_ring_capacity,
                config.tunables.peer_sub_capacity,
            );
            net.add_peer(Arc::new(peer));
        }

        let sub_pipe = bus.create_pipe("SBN_SUBS", config.tunables.local_sub_capacity)?;

        let app = Arc::new(App {
            local_processor_id: config.local_processor_id,
            local_spacecraft_id: config.local_spacecraft_id,
            bus,
            event_sink,
            nets,
            remap_table,
            local_subs: Mutex::new(LocalSubscriptionTable::new(config.tunables.local_sub_capacity)),
            sub_pipe,
            tunables: config.tunables,
        });

        outlet
            .app
            .set(Arc::downgrade(&app))
            .unwrap_or_else(|_| unreachable!("AppOutlet.app is set exactly once, during App::new"));

        Ok(app)
    }

    /// Runs the SB startup handshake (spec.md §4.8) and seeds the local
    /// subscription table from whatever snapshot SB reports. Separate from
    /// `App::new` so constructing an `App` against a test double that never
    /// answers (e.g. `LoopbackBus`) doesn't block — callers with a real SB
    /// opt into the bounded retry explicitly.
    pub fn run_startup_handshake(&self, retry_interval: Duration, max_attempts: u32) -> SbnResult<()> {
        let entries = startup::perform_handshake(self.bus.as_ref(), self.sub_pipe, retry_interval, max_attempts)?;
        let mut table = self.local_subs.lock().unwrap();
        for entry in entries {
            distributor::apply_local_subscribe(&mut table, entry.mid, entry.qos);
        }
        Ok(())
    }

    fn find_peer(&self, processor_id: u32) -> Option<(&Net, &Arc<Peer>)> {
        self.nets.iter().find_map(|net| net.peer(processor_id).map(|peer| (net, peer)))
    }

    /// DISCONNECTED -> CONNECTED upcall (spec.md §4.4): opens the peer's
    /// outbound pipe if this is its first connect, then advertises the
    /// full local subscription set as a burst of SUBSCRIBE frames.
    pub fn on_connected(&self, processor_id: u32) {
        let Some((net, peer)) = self.find_peer(processor_id) else {
            warn!("connected() upcall for unrecognized peer {processor_id}");
            return;
        };

        let pipe = match peer.outbound_pipe() {
            Some(pipe) => pipe,
            None => {
                let name = format!("sbn_peer_{processor_id}_out");
                match self.bus.create_pipe(&name, self.tunables.peer_sub_capacity) {
                    Ok(pipe) => pipe,
                    Err(e) => {
                        warn!("failed to create outbound pipe for peer {processor_id}: {e}");
                        return;
                    }
                }
            }
        };

        peer.mark_connected(pipe);
        peer.counters.record_recv();
        self.event_sink
            .emit(SbnEvent::new("core", 0, 1, Severity::Info, format!("peer {processor_id} connected")));
        self.advertise_local_subscriptions(net, peer);
    }

    /// CONNECTED -> DISCONNECTED upcall (spec.md §4.4): drops the peer's
    /// local bus subscriptions and closes its outbound pipe.
    pub(crate) fn on_disconnected(&self, processor_id: u32) {
        let Some((_, peer)) = self.find_peer(processor_id) else {
            return;
        };

        let (pipe, mids) = peer.mark_disconnected();
        if let Some(pipe) = pipe {
            for mid in mids {
                self.bus.unsubscribe_local(pipe, mid);
            }
            self.bus.delete_pipe(pipe);
        }
        self.event_sink
            .emit(SbnEvent::new("core", 0, 2, Severity::Warning, format!("peer {processor_id} disconnected")));
    }

    fn advertise_local_subscriptions(&self, net: &Net, peer: &Peer) {
        let entries = distributor::local_set_as_subscribe_frames(&self.local_subs.lock().unwrap());
        let _guard = net.send_lock.lock().unwrap();
        for (mid, qos) in entries {
            if !peer.is_connected() {
                break;
            }
            let payload = distributor::subscribe_payload(mid, qos);
            if let Err(e) = net.protocol.send(net.net_id, peer.processor_id, MsgType::Subscribe, &payload) {
                warn!("failed to advertise subscription {mid} to newly connected peer {processor_id}: {e}", processor_id = peer.processor_id);
            }
        }
    }
}
