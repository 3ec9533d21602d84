//! The narrow software-bus interface SBN consumes (spec.md §6).
//!
//! SBN treats the local publish/subscribe primitive as an external
//! collaborator (spec.md §1): "The core consumes a narrow SB interface:
//! create pipe, (un)subscribe locally, receive from pipe, publish to
//! pipe, ask SB to dump current subscriptions." This module defines that
//! boundary as a trait, plus an in-memory implementation
//! (`LoopbackBus`) that stands in for a real software bus in tests —
//! the real SB primitive itself is explicitly out of scope.

use std::time::Duration;

use crate::error::SbnResult;
use crate::mid::{Mid, Qos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u32);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PipeOptions: u8 {
        const IGNORE_MINE = 0b0000_0001;
    }
}

/// A message as it travels across the local software bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbMessage {
    pub mid: Mid,
    /// Originating processor id, when known (preserved across a publish
    /// that re-injects a peer's message, per spec.md §4.7 "Publish into
    /// local SB" — "reuses the original sender metadata where present").
    pub sender_processor_id: Option<u32>,
    pub payload: Vec<u8>,
}

impl SbMessage {
    pub fn new(mid: Mid, payload: Vec<u8>) -> SbMessage {
        SbMessage {
            mid,
            sender_processor_id: None,
            payload,
        }
    }

    pub fn from_peer(mid: Mid, payload: Vec<u8>, processor_id: u32) -> SbMessage {
        SbMessage {
            mid,
            sender_processor_id: Some(processor_id),
            payload,
        }
    }
}

/// One entry of an "all subscriptions" snapshot report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubEntry {
    pub mid: Mid,
    pub qos: Qos,
}

/// Reports delivered on the dedicated subscription-report pipe (spec.md
/// §4.5): "one subscription (un)subscribed" and "all subscriptions
/// snapshot".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionReport {
    Subscribed(SubEntry),
    Unsubscribed(SubEntry),
    Snapshot(Vec<SubEntry>),
}

/// Something arriving on a pipe: either an application message or (only
/// on the dedicated subscription pipe) a subscription report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipePayload {
    App(SbMessage),
    Sub(SubscriptionReport),
}

/// The narrow interface SBN needs from the local software bus.
pub trait SoftwareBus: Send + Sync {
    fn create_pipe(&self, name: &str, depth: usize) -> SbnResult<PipeId>;
    fn delete_pipe(&self, pipe: PipeId);
    fn subscribe_local(&self, pipe: PipeId, mid: Mid, msg_limit: u32) -> SbnResult<()>;
    fn unsubscribe_local(&self, pipe: PipeId, mid: Mid);
    fn publish(&self, msg: SbMessage) -> SbnResult<()>;
    /// Blocks up to `timeout` (or forever if `None`) waiting for the next
    /// payload on `pipe`. Returns `None` on timeout/empty.
    fn receive(&self, pipe: PipeId, timeout: Option<Duration>) -> Option<PipePayload>;
    fn set_pipe_options(&self, pipe: PipeId, options: PipeOptions);
    fn enable_subscription_reporting(&self);
    fn request_previous_subscriptions(&self);
}
