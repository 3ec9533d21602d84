//! Configuration table structure (spec.md §6 "Configuration table").
//!
//! Reading these from disk is out of scope (spec.md §1/§6: "loaded at
//! startup and on reload command" describes the table's *shape*, not a
//! file format this crate must parse). Under the `config-serde` feature
//! these derive `serde::Deserialize` so a caller can feed them from
//! whatever on-disk format it likes, the way `aptos-config` models its
//! node configuration as plain structs a separate loader deserializes
//! into.

use crate::mid::Mid;
use crate::net::TaskFlags;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct ProtocolModuleConfig {
    pub name: String,
    pub library_path: String,
    pub symbol_name: String,
    pub base_event_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct FilterModuleConfig {
    pub name: String,
    pub library_path: String,
    pub symbol_name: String,
    pub base_event_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct PeerConfig {
    pub processor_id: u32,
    pub spacecraft_id: u32,
    pub net_number: u32,
    pub protocol_name: String,
    pub filter_names: Vec<String>,
    pub address: String,
    #[cfg_attr(feature = "config-serde", serde(default = "default_task_flags_bits"))]
    pub task_flags_bits: u8,
}

impl PeerConfig {
    pub fn task_flags(&self) -> TaskFlags {
        TaskFlags::from_bits_truncate(self.task_flags_bits)
    }
}

#[cfg(feature = "config-serde")]
fn default_task_flags_bits() -> u8 {
    TaskFlags::POLL.bits()
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct NetConfig {
    pub net_number: u32,
    pub protocol_name: String,
    pub address: String,
    #[cfg_attr(feature = "config-serde", serde(default = "default_task_flags_bits"))]
    pub task_flags_bits: u8,
}

impl NetConfig {
    pub fn task_flags(&self) -> TaskFlags {
        TaskFlags::from_bits_truncate(self.task_flags_bits)
    }
}

/// One row of the RemapTable's on-disk representation (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct RemapRowConfig {
    pub processor_id: u32,
    pub from_mid: u32,
    pub to_mid: u32,
}

impl RemapRowConfig {
    pub fn from_mid(&self) -> Mid {
        Mid(self.from_mid)
    }

    pub fn to_mid(&self) -> Mid {
        Mid(self.to_mid)
    }
}

/// On-disk representation of the default action named in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub enum RemapDefaultActionConfig {
    Drop,
    PassThrough,
}

impl From<RemapDefaultActionConfig> for crate::remap::RemapAction {
    fn from(v: RemapDefaultActionConfig) -> Self {
        match v {
            RemapDefaultActionConfig::Drop => crate::remap::RemapAction::Drop,
            RemapDefaultActionConfig::PassThrough => crate::remap::RemapAction::PassThrough,
        }
    }
}

/// The RemapTable's on-disk representation (spec.md §6): a row list plus
/// the default action for MIDs with no matching row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct RemapTableConfig {
    pub default_action: RemapDefaultActionConfig,
    pub rows: Vec<RemapRowConfig>,
}

/// Tunables the spec leaves as "configured" without naming a home for
/// them (send/deferred ring capacity, table capacities, ACK threshold,
/// retransmit ceiling, heartbeat/timeout intervals, main loop period).
/// Grouped here rather than scattered as free function parameters so
/// `App::new` takes one coherent value, the way the teacher's socket
/// options are grouped under `SocketOption`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct Tunables {
    pub send_ring_capacity: usize,
    pub deferred_ring_capacity: usize,
    pub local_sub_capacity: usize,
    pub peer_sub_capacity: usize,
    pub ack_threshold: u32,
    pub retransmit_ceiling: u32,
    pub max_drain_per_wakeup: u32,
    pub max_recv_per_wakeup: u32,
    pub heartbeat_interval_ms: u64,
    pub peer_timeout_ms: u64,
    pub wakeup_period_ms: u64,
}

impl Default for Tunables {
    /// Defaults chosen from spec.md's own examples: 200ms wakeup period
    /// (§4.8), ACK threshold of 16 (§4.7), SendRing capacity of 8 used in
    /// §8's "full send ring" scenario generalized to a more generous
    /// default, 0 (disabled) heartbeat/timeout left to the protocol
    /// module/caller to opt into (§4.4: "either may be zero, in which case
    /// the corresponding behavior is disabled").
    fn default() -> Tunables {
        Tunables {
            send_ring_capacity: 256,
            deferred_ring_capacity: 64,
            local_sub_capacity: 256,
            peer_sub_capacity: 256,
            ack_threshold: 16,
            retransmit_ceiling: 3,
            max_drain_per_wakeup: 32,
            max_recv_per_wakeup: 32,
            heartbeat_interval_ms: 0,
            peer_timeout_ms: 0,
            wakeup_period_ms: 200,
        }
    }
}

/// The full configuration table (spec.md §6): modules, nets, peers, the
/// remap table, and the tunables above.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Deserialize))]
pub struct AppConfig {
    pub local_processor_id: u32,
    pub local_spacecraft_id: u32,
    pub protocol_modules: Vec<ProtocolModuleConfig>,
    pub filter_modules: Vec<FilterModuleConfig>,
    pub nets: Vec<NetConfig>,
    pub peers: Vec<PeerConfig>,
    #[cfg_attr(feature = "config-serde", serde(default))]
    pub remap_table: Option<RemapTableConfig>,
    #[cfg_attr(feature = "config-serde", serde(default))]
    pub tunables: Tunables,
}
