//! `LoopbackBus`: an in-memory stand-in for a real software bus.
//!
//! The real SB primitive is out of scope (spec.md §1). This gives tests
//! and the example binary something concrete to drive `App` with, backed
//! by `std::sync::mpsc` channels the way the teacher's `event_loop_msg.rs`
//! wires its own facade/backend split together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{SbnError, SbnResult};
use crate::mid::Mid;
use crate::sb::{PipeId, PipeOptions, PipePayload, SbMessage, SoftwareBus, SubEntry, SubscriptionReport};

struct PipeState {
    name: String,
    tx: Sender<PipePayload>,
    // Wrapped so `receive` can clone the handle out and block on it
    // without holding the `pipes` map lock — otherwise one blocked
    // receiver would stall every other pipe's publish/subscribe calls.
    rx: Arc<Mutex<Receiver<PipePayload>>>,
    subscribed: Mutex<Vec<Mid>>,
}

/// A single-process, multi-pipe software bus. `publish` fans a message out
/// to every pipe subscribed to its MID; `create_pipe` on the name
/// `"SBN_SUBS"` gets subscription reports instead of app traffic, mirroring
/// the dedicated subscription pipe spec.md §4.5/§4.8 describe.
pub struct LoopbackBus {
    next_pipe_id: AtomicU32,
    pipes: Mutex<HashMap<u32, PipeState>>,
    reporting_enabled: Mutex<bool>,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBus {
    pub fn new() -> LoopbackBus {
        LoopbackBus {
            next_pipe_id: AtomicU32::new(1),
            pipes: Mutex::new(HashMap::new()),
            reporting_enabled: Mutex::new(false),
        }
    }

    /// Test/demo helper standing in for "a local app calls SB subscribe".
    /// Queues a subscription report on every pipe named `"SBN_SUBS"` if
    /// reporting is enabled.
    pub fn local_app_subscribe(&self, mid: Mid, qos: crate::mid::Qos) {
        self.report_if_enabled(SubscriptionReport::Subscribed(SubEntry { mid, qos }));
    }

    pub fn local_app_unsubscribe(&self, mid: Mid, qos: crate::mid::Qos) {
        self.report_if_enabled(SubscriptionReport::Unsubscribed(SubEntry { mid, qos }));
    }

    fn report_if_enabled(&self, report: SubscriptionReport) {
        if !*self.reporting_enabled.lock().unwrap() {
            return;
        }
        let pipes = self.pipes.lock().unwrap();
        for pipe in pipes.values() {
            if pipe.name == "SBN_SUBS" {
                let _ = pipe.tx.send(PipePayload::Sub(report.clone()));
            }
        }
    }
}

impl SoftwareBus for LoopbackBus {
    fn create_pipe(&self, name: &str, _depth: usize) -> SbnResult<PipeId> {
        let id = self.next_pipe_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = std::sync::mpsc::channel();
        self.pipes.lock().unwrap().insert(
            id,
            PipeState {
                name: name.to_owned(),
                tx,
                rx: Arc::new(Mutex::new(rx)),
                subscribed: Mutex::new(Vec::new()),
            },
        );
        Ok(PipeId(id))
    }

    fn delete_pipe(&self, pipe: PipeId) {
        self.pipes.lock().unwrap().remove(&pipe.0);
    }

    fn subscribe_local(&self, pipe: PipeId, mid: Mid, _msg_limit: u32) -> SbnResult<()> {
        let pipes = self.pipes.lock().unwrap();
        let state = pipes
            .get(&pipe.0)
            .ok_or_else(|| SbnError::Sb(format!("no such pipe {:?}", pipe)))?;
        let mut subs = state.subscribed.lock().unwrap();
        if !subs.contains(&mid) {
            subs.push(mid);
        }
        Ok(())
    }

    fn unsubscribe_local(&self, pipe: PipeId, mid: Mid) {
        if let Some(state) = self.pipes.lock().unwrap().get(&pipe.0) {
            state.subscribed.lock().unwrap().retain(|m| *m != mid);
        }
    }

    fn publish(&self, msg: SbMessage) -> SbnResult<()> {
        let pipes = self.pipes.lock().unwrap();
        for state in pipes.values() {
            let subscribed = state.subscribed.lock().unwrap().contains(&msg.mid);
            if subscribed {
                let _ = state.tx.send(PipePayload::App(msg.clone()));
            }
        }
        Ok(())
    }

    fn receive(&self, pipe: PipeId, timeout: Option<Duration>) -> Option<PipePayload> {
        let rx_handle = {
            let pipes = self.pipes.lock().unwrap();
            pipes.get(&pipe.0)?.rx.clone()
        };
        let rx = rx_handle.lock().unwrap();

        match timeout {
            Some(d) => rx.recv_timeout(d).ok(),
            None => match rx.try_recv() {
                Ok(payload) => Some(payload),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
            },
        }
    }

    fn set_pipe_options(&self, _pipe: PipeId, _options: PipeOptions) {}

    fn enable_subscription_reporting(&self) {
        *self.reporting_enabled.lock().unwrap() = true;
    }

    fn request_previous_subscriptions(&self) {
        // LoopbackBus has no prior state to dump; a real SB would reply
        // with a Snapshot report on the subscription pipe here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mid::Qos;

    #[test]
    fn publish_only_reaches_subscribed_pipes() {
        let bus = LoopbackBus::new();
        let a = bus.create_pipe("a", 8).unwrap();
        let b = bus.create_pipe("b", 8).unwrap();
        bus.subscribe_local(a, Mid(1), 8).unwrap();

        bus.publish(SbMessage::new(Mid(1), vec![1, 2, 3])).unwrap();

        assert!(matches!(
            bus.receive(a, Some(Duration::from_millis(50))),
            Some(PipePayload::App(_))
        ));
        assert_eq!(bus.receive(b, Some(Duration::from_millis(10))), None);
    }

    #[test]
    fn subscription_reports_only_flow_once_enabled() {
        let bus = LoopbackBus::new();
        let subs = bus.create_pipe("SBN_SUBS", 8).unwrap();
        bus.local_app_subscribe(Mid(9), Qos::default());
        assert_eq!(bus.receive(subs, Some(Duration::from_millis(10))), None);

        bus.enable_subscription_reporting();
        bus.local_app_subscribe(Mid(9), Qos::default());
        assert!(matches!(
            bus.receive(subs, Some(Duration::from_millis(50))),
            Some(PipePayload::Sub(_))
        ));
    }
}
