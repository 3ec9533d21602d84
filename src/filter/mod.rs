//! Filter module interface (spec.md §4.3, C3).
//!
//! Each filter exposes `filter_send`/`filter_recv`/`remap_mid`. The chain
//! of filters configured on a peer runs in declaration order. Per the
//! REDESIGN FLAGS in spec.md §9 ("prefer compile-time composition" over
//! the C source's dynamic-library-plus-function-pointer-struct loading),
//! this is a plain trait plus a name-keyed static registry, mirroring how
//! the teacher selects a `Protocol` implementation from a `SocketType` in
//! `socket_impl.rs::create_transport`.

pub mod ccsds_endian;
pub mod remap;

use crate::error::SbnResult;
use crate::mid::Mid;

/// Direction a message is flowing, supplied to filters via `FilterContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

/// Peer identity plus direction, passed to every filter call.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    pub processor_id: u32,
    pub spacecraft_id: u32,
    pub direction: Direction,
}

/// Outcome of a `filter_send`/`filter_recv` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    /// Continue sending/delivering the (possibly mutated) message.
    Success,
    /// Drop the message silently.
    IfEmpty,
    /// Drop the message and report an error.
    Error(String),
}

/// Capability set a filter module provides (spec.md §4.3).
pub trait FilterModule: Send + Sync {
    /// Stable name used to reference this module from peer configuration.
    fn name(&self) -> &'static str;

    fn base_event_id(&self) -> u32;
    fn version(&self) -> u32;

    /// Called just before a local message is framed for a given peer; may
    /// mutate `payload` in place.
    fn filter_send(&self, payload: &mut Vec<u8>, ctx: &FilterContext) -> FilterResult;

    /// Called after a received app message is parsed, before injection
    /// into the local SB.
    fn filter_recv(&self, payload: &mut Vec<u8>, ctx: &FilterContext) -> FilterResult;

    /// Translates a MID across the peer boundary during (un)subscribe
    /// processing. `Ok(None)` means "skip this subscription item."
    fn remap_mid(&self, mid: Mid, ctx: &FilterContext) -> SbnResult<Option<Mid>> {
        let _ = ctx;
        Ok(Some(mid))
    }
}

/// Runs `payload` through `chain` in declaration order for the send
/// direction, short-circuiting on the first non-`Success` result.
pub fn run_send_chain(
    chain: &[Box<dyn FilterModule>],
    payload: &mut Vec<u8>,
    ctx: &FilterContext,
) -> FilterResult {
    for filter in chain {
        match filter.filter_send(payload, ctx) {
            FilterResult::Success => continue,
            other => return other,
        }
    }
    FilterResult::Success
}

/// Runs `payload` through `chain` in declaration order for the recv
/// direction, short-circuiting on the first non-`Success` result.
pub fn run_recv_chain(
    chain: &[Box<dyn FilterModule>],
    payload: &mut Vec<u8>,
    ctx: &FilterContext,
) -> FilterResult {
    for filter in chain {
        match filter.filter_recv(payload, ctx) {
            FilterResult::Success => continue,
            other => return other,
        }
    }
    FilterResult::Success
}

/// Runs `mid` through `chain`'s `remap_mid` in order; the first filter
/// that changes or rejects it wins (matching "called during (un)subscribe
/// processing ... to translate MIDs across the boundary", spec.md §4.3 —
/// a chain of remappers is expected to be rare, but nothing in the spec
/// forbids more than one filter module per peer implementing it).
pub fn run_remap_chain(
    chain: &[Box<dyn FilterModule>],
    mid: Mid,
    ctx: &FilterContext,
) -> SbnResult<Option<Mid>> {
    let mut current = mid;
    for filter in chain {
        match filter.remap_mid(current, ctx)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}
