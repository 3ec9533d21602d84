//! Error taxonomy for the SBN core (spec.md §7).
//!
//! Every variant maps to one of the seven categories the spec calls out:
//! Configuration, Resource, Transport, Protocol, Filter, Ordering, Sb.
//! Transport/Protocol/Filter/Ordering/Sb errors are always local to one
//! peer and never propagate past the call site that produced them; only
//! Configuration and Resource errors at init are meant to reach a process
//! exit path (left to the caller of `App::new`).

use std::io;

use crate::mid::Mid;

#[derive(Debug, thiserror::Error)]
pub enum SbnError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("transport error on peer {peer}: {source}")]
    Transport { peer: u32, source: io::Error },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("filter '{filter}' rejected message for mid {mid:?}: {reason}")]
    Filter {
        filter: &'static str,
        mid: Option<Mid>,
        reason: String,
    },

    #[error("ordering error: {0}")]
    Ordering(String),

    #[error("software bus error: {0}")]
    Sb(String),
}

pub type SbnResult<T> = Result<T, SbnError>;
