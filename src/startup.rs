//! SB startup coordination (spec.md §4.8 "SB startup coordination", §9
//! design note: "Model the handshake as an explicit state machine ...
//! driven by a select over the subscription pipe and the event pipe; no
//! temporary coroutine/generator constructs.").
//!
//! The narrow `SoftwareBus` interface (spec.md §6) exposes no separate
//! SB-event stream — the "is SB itself up yet" signal is internal to a
//! real software bus and explicitly out of scope (spec.md §1: "The
//! ground command / housekeeping telemetry surface ... Configuration and
//! remap tables stored on disk"; §6 names only the narrow pipe-based
//! interface). So the three-state machine's "saw-sb-init-event" branch
//! collapses to its documented fallback here: "If the event fires first,
//! the core re-issues the enable+dump requests" — modeled as a bounded
//! retry of enable+dump against the one pipe the interface does expose,
//! rather than a second stream this crate has no handle to.

use std::time::Duration;

use crate::error::{SbnError, SbnResult};
use crate::sb::{PipeId, PipePayload, SoftwareBus, SubEntry, SubscriptionReport};

/// Repeatedly asks `bus` to enable subscription reporting and dump its
/// current subscriptions, retrying every `retry_interval` up to
/// `max_attempts` times. Returns the snapshot once SB responds.
///
/// A fatal init error (spec.md §6: "cannot register with SB" is one of
/// the named fatal conditions) if SB never answers.
pub fn perform_handshake(
    bus: &dyn SoftwareBus,
    sub_pipe: PipeId,
    retry_interval: Duration,
    max_attempts: u32,
) -> SbnResult<Vec<SubEntry>> {
    for attempt in 0..max_attempts {
        bus.enable_subscription_reporting();
        bus.request_previous_subscriptions();

        match bus.receive(sub_pipe, Some(retry_interval)) {
            Some(PipePayload::Sub(SubscriptionReport::Snapshot(entries))) => return Ok(entries),
            // A single subscribed/unsubscribed report also proves SB is
            // alive and listening; treat it as "ready" with whatever it
            // told us (an unsubscribe of something we never had is a
            // no-op once fed through the distributor).
            Some(PipePayload::Sub(SubscriptionReport::Subscribed(entry))) => return Ok(vec![entry]),
            Some(PipePayload::Sub(SubscriptionReport::Unsubscribed(_))) => return Ok(Vec::new()),
            Some(PipePayload::App(_)) | None => {
                log::debug!("sb startup handshake: no subscription response on attempt {attempt}, retrying");
            }
        }
    }

    Err(SbnError::Resource(
        "software bus did not respond to subscription dump request".into(),
    ))
}
