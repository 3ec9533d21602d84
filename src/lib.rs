//! Software Bus Network (SBN): extends a local publish/subscribe software
//! bus across peer processors via pluggable protocol and filter modules
//! (spec.md §1 Overview).
//!
//! Grounded in the teacher's top-level `lib.rs` module layout: one module
//! per concern, re-exporting the handful of types a caller actually needs
//! to stand up an `App` and drive its `Scheduler`.

pub mod app;
pub mod config;
pub mod distributor;
pub mod error;
pub mod events;
pub mod filter;
pub mod loopback;
pub mod mid;
pub mod net;
pub mod peer;
pub mod protocol;
pub mod recv_pipeline;
pub mod remap;
pub mod ring;
pub mod sb;
pub mod scheduler;
pub mod send_pipeline;
pub mod startup;
pub mod subscription;
pub mod telemetry;
pub mod wire;

pub use app::App;
pub use config::AppConfig;
pub use error::{SbnError, SbnResult};
pub use scheduler::Scheduler;

/// Protocol version identifier stamped into every PROTOCOL frame and
/// checked against a peer's on connect (spec.md §4.2, §6).
pub const VERSION_ID: &str = "SBN 2.5.0";
