//! End-to-end integration tests exercising `App`/`Scheduler` together,
//! the way a real caller would: build two `App`s against two `UdpModule`
//! nets bound to loopback UDP sockets, drive each with its own
//! `Scheduler`, and observe messages crossing the boundary through each
//! side's own `LoopbackBus`.

use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sbn::app::App;
use sbn::config::{AppConfig, NetConfig, PeerConfig, ProtocolModuleConfig, Tunables};
use sbn::events::LoggingEventSink;
use sbn::loopback::LoopbackBus;
use sbn::mid::{Mid, Qos};
use sbn::net::TaskFlags;
use sbn::sb::{PipePayload, SbMessage, SoftwareBus};
use sbn::scheduler::Scheduler;

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

/// One UDP-linked node: its own `App`/`Scheduler`/`LoopbackBus`, plus the
/// processor id its one configured peer refers to it by.
struct Node {
    app: Arc<App>,
    scheduler: Scheduler,
    bus: Arc<LoopbackBus>,
}

fn build_node(local_id: u32, local_port: u16, peer_id: u32, peer_port: u16) -> Node {
    let config = AppConfig {
        local_processor_id: local_id,
        local_spacecraft_id: 1,
        protocol_modules: vec![ProtocolModuleConfig {
            name: "udp".into(),
            library_path: String::new(),
            symbol_name: String::new(),
            base_event_id: 100,
        }],
        filter_modules: vec![],
        nets: vec![NetConfig {
            net_number: 0,
            protocol_name: "udp".into(),
            address: format!("127.0.0.1:{local_port}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        peers: vec![PeerConfig {
            processor_id: peer_id,
            spacecraft_id: 2,
            net_number: 0,
            protocol_name: "udp".into(),
            filter_names: vec![],
            address: format!("127.0.0.1:{peer_port}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        remap_table: None,
        tunables: Tunables {
            wakeup_period_ms: 10,
            // UdpModule::poll_peer reports no connection state of its own,
            // so a nonzero heartbeat is what lets these two fresh peers
            // ever exchange a first frame at all.
            heartbeat_interval_ms: 20,
            ..Tunables::default()
        },
    };

    let bus = Arc::new(LoopbackBus::new());
    let app = App::new(config.clone(), bus.clone() as Arc<dyn SoftwareBus>, Arc::new(LoggingEventSink)).unwrap();
    let scheduler = Scheduler::new(app.clone(), &config);
    Node { app, scheduler, bus }
}

/// Ticks every node's scheduler until `done` reports true or `timeout`
/// elapses.
fn pump(nodes: &[&Node], timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        for node in nodes {
            node.scheduler.tick();
        }
        if done() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn two_nodes_reach_each_other_over_udp_once_a_subscriber_appears() {
    let port_a = free_port();
    let port_b = free_port();
    let node_a = build_node(1, port_a, 2, port_b);
    let node_b = build_node(2, port_b, 1, port_a);

    // Node B's local app subscribes; that should fan out to node A once
    // the UDP peer link comes up via the scheduler's implicit-connect
    // path (UdpModule::poll_peer never calls Outlet::connected itself).
    let consumer_pipe = node_b.bus.create_pipe("consumer", 8).unwrap();
    node_b.bus.subscribe_local(consumer_pipe, Mid(0x10), 8).unwrap();
    node_b.bus.local_app_subscribe(Mid(0x10), Qos::default());

    pump(&[&node_a, &node_b], Duration::from_secs(2), || {
        node_a.app.nets[0].peer(2).map(|p| p.is_connected()).unwrap_or(false)
            && node_b.app.nets[0].peer(1).map(|p| p.is_connected()).unwrap_or(false)
    });

    assert!(node_a.app.nets[0].peer(2).unwrap().is_connected());
    assert!(node_b.app.nets[0].peer(1).unwrap().is_connected());

    // Node A publishes locally; node B's peer-subscribed pipe should
    // eventually carry it through to the consumer pipe on B's own bus.
    node_a.bus.publish(SbMessage::new(Mid(0x10), vec![1, 2, 3])).unwrap();

    let mut received = None;
    pump(&[&node_a, &node_b], Duration::from_secs(2), || {
        if let Some(PipePayload::App(msg)) = node_b.bus.receive(consumer_pipe, Some(Duration::ZERO)) {
            received = Some(msg.payload);
            true
        } else {
            false
        }
    });

    assert_eq!(received, Some(vec![1, 2, 3]));
}

#[test]
fn subscribing_after_the_peer_link_is_already_up_still_fans_out() {
    let port_a = free_port();
    let port_b = free_port();
    let node_a = build_node(1, port_a, 2, port_b);
    let node_b = build_node(2, port_b, 1, port_a);

    // Bring the link up with no subscriptions in play yet, so the only
    // path that can install B's subscription on A afterwards is
    // `distributor::fan_out_local_change`, not the connect-time burst.
    pump(&[&node_a, &node_b], Duration::from_secs(2), || {
        node_a.app.nets[0].peer(2).map(|p| p.is_connected()).unwrap_or(false)
            && node_b.app.nets[0].peer(1).map(|p| p.is_connected()).unwrap_or(false)
    });
    assert!(node_a.app.nets[0].peer(2).unwrap().is_connected());

    let consumer_pipe = node_b.bus.create_pipe("consumer", 8).unwrap();
    node_b.bus.subscribe_local(consumer_pipe, Mid(0x50), 8).unwrap();
    node_b.bus.local_app_subscribe(Mid(0x50), Qos::default());

    pump(&[&node_a, &node_b], Duration::from_secs(2), || {
        node_a.app.nets[0].peer(2).unwrap().peer_subscription_mids().contains(&Mid(0x50))
    });
    assert!(node_a.app.nets[0].peer(2).unwrap().peer_subscription_mids().contains(&Mid(0x50)));

    node_a.bus.publish(SbMessage::new(Mid(0x50), vec![7])).unwrap();
    let mut received = None;
    pump(&[&node_a, &node_b], Duration::from_secs(2), || {
        if let Some(PipePayload::App(msg)) = node_b.bus.receive(consumer_pipe, Some(Duration::ZERO)) {
            received = Some(msg.payload);
            true
        } else {
            false
        }
    });
    assert_eq!(received, Some(vec![7]));
}

#[test]
fn unsubscribing_locally_stops_further_fanout_to_the_peer() {
    let port_a = free_port();
    let port_b = free_port();
    let node_a = build_node(1, port_a, 2, port_b);
    let node_b = build_node(2, port_b, 1, port_a);

    let consumer_pipe = node_b.bus.create_pipe("consumer", 8).unwrap();
    node_b.bus.subscribe_local(consumer_pipe, Mid(0x20), 8).unwrap();
    node_b.bus.local_app_subscribe(Mid(0x20), Qos::default());

    pump(&[&node_a, &node_b], Duration::from_secs(2), || {
        node_a.app.nets[0].peer(2).map(|p| p.is_connected()).unwrap_or(false)
    });

    node_b.bus.local_app_unsubscribe(Mid(0x20), Qos::default());
    pump(&[&node_a, &node_b], Duration::from_millis(500), || {
        !node_a.app.nets[0].peer(2).unwrap().peer_subscription_mids().contains(&Mid(0x20))
    });

    assert!(!node_a.app.nets[0].peer(2).unwrap().peer_subscription_mids().contains(&Mid(0x20)));

    node_a.bus.publish(SbMessage::new(Mid(0x20), vec![9])).unwrap();
    pump(&[&node_a, &node_b], Duration::from_millis(300), || false);
    assert_eq!(node_b.bus.receive(consumer_pipe, Some(Duration::ZERO)), None);
}

#[test]
fn peer_idle_past_timeout_is_disconnected_by_the_scheduler() {
    let port_a = free_port();
    let port_b = free_port();

    let config = AppConfig {
        local_processor_id: 1,
        local_spacecraft_id: 1,
        protocol_modules: vec![ProtocolModuleConfig {
            name: "udp".into(),
            library_path: String::new(),
            symbol_name: String::new(),
            base_event_id: 100,
        }],
        filter_modules: vec![],
        nets: vec![NetConfig {
            net_number: 0,
            protocol_name: "udp".into(),
            address: format!("127.0.0.1:{port_a}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        peers: vec![PeerConfig {
            processor_id: 2,
            spacecraft_id: 2,
            net_number: 0,
            protocol_name: "udp".into(),
            filter_names: vec![],
            address: format!("127.0.0.1:{port_b}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        remap_table: None,
        tunables: Tunables {
            wakeup_period_ms: 10,
            peer_timeout_ms: 50,
            ..Tunables::default()
        },
    };

    let bus: Arc<dyn SoftwareBus> = Arc::new(LoopbackBus::new());
    let app = App::new(config.clone(), bus, Arc::new(LoggingEventSink)).unwrap();
    let scheduler = Scheduler::new(app.clone(), &config);

    app.on_connected(2);
    assert!(app.nets[0].peer(2).unwrap().is_connected());

    thread::sleep(Duration::from_millis(120));
    scheduler.tick();

    assert!(!app.nets[0].peer(2).unwrap().is_connected());
}

#[test]
fn remap_table_drops_subscriptions_whose_mid_maps_to_zero() {
    use sbn::config::{RemapDefaultActionConfig, RemapRowConfig, RemapTableConfig};
    use sbn::filter::{Direction, FilterContext};

    let port_a = free_port();
    let port_b = free_port();

    let config = AppConfig {
        local_processor_id: 1,
        local_spacecraft_id: 1,
        protocol_modules: vec![ProtocolModuleConfig {
            name: "udp".into(),
            library_path: String::new(),
            symbol_name: String::new(),
            base_event_id: 100,
        }],
        filter_modules: vec![],
        nets: vec![NetConfig {
            net_number: 0,
            protocol_name: "udp".into(),
            address: format!("127.0.0.1:{port_a}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        peers: vec![PeerConfig {
            processor_id: 2,
            spacecraft_id: 2,
            net_number: 0,
            protocol_name: "udp".into(),
            filter_names: vec!["remap".into()],
            address: format!("127.0.0.1:{port_b}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        remap_table: Some(RemapTableConfig {
            default_action: RemapDefaultActionConfig::PassThrough,
            rows: vec![RemapRowConfig {
                processor_id: 2,
                from_mid: 0x30,
                to_mid: 0,
            }],
        }),
        tunables: Tunables::default(),
    };

    let bus: Arc<dyn SoftwareBus> = Arc::new(LoopbackBus::new());
    let app = App::new(config, bus, Arc::new(LoggingEventSink)).unwrap();
    app.on_connected(2);

    let peer = app.nets[0].peer(2).unwrap();
    let ctx = FilterContext {
        processor_id: 2,
        spacecraft_id: 2,
        direction: Direction::Recv,
    };
    sbn::distributor::apply_peer_subscribe(peer, app.bus.as_ref(), peer.outbound_pipe().unwrap(), Mid(0x30), Qos::default(), &ctx);

    assert!(!peer.peer_subscription_mids().contains(&Mid(0x30)));
}

#[test]
fn app_run_startup_handshake_seeds_local_subscriptions_from_sb_snapshot() {
    let port_a = free_port();
    let config = AppConfig {
        local_processor_id: 1,
        local_spacecraft_id: 1,
        protocol_modules: vec![ProtocolModuleConfig {
            name: "udp".into(),
            library_path: String::new(),
            symbol_name: String::new(),
            base_event_id: 100,
        }],
        filter_modules: vec![],
        nets: vec![NetConfig {
            net_number: 0,
            protocol_name: "udp".into(),
            address: format!("127.0.0.1:{port_a}"),
            task_flags_bits: TaskFlags::POLL.bits(),
        }],
        peers: vec![],
        remap_table: None,
        tunables: Tunables::default(),
    };

    let bus = Arc::new(LoopbackBus::new());
    let app = App::new(config, bus.clone() as Arc<dyn SoftwareBus>, Arc::new(LoggingEventSink)).unwrap();

    // The SBN_SUBS pipe only exists once `App::new` has created it, so
    // the local app's subscribe has to land after that — fired from a
    // background thread partway through the handshake's retry window.
    let bus_for_thread = bus.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(15));
        bus_for_thread.local_app_subscribe(Mid(0x40), Qos::default());
    });

    app.run_startup_handshake(Duration::from_millis(20), 10).unwrap();

    let table = app.local_subs.lock().unwrap();
    assert!(table.contains(Mid(0x40)));
}

#[test]
fn scheduler_spawns_no_dedicated_tasks_for_a_poll_only_configuration() {
    let port_a = free_port();
    let port_b = free_port();
    let node = build_node(1, port_a, 2, port_b);
    let scheduler = Arc::new(node.scheduler);
    let handles = scheduler.spawn_dedicated_tasks();
    assert!(handles.is_empty(), "POLL-only config spawns no dedicated tasks");
}
