//! Subscription tables (spec.md §3, §4.5).
//!
//! The local set tracks how many local apps hold each subscription so SBN
//! only emits one UNSUBSCRIBE to peers when the count drops to zero. The
//! per-peer set has no counter because peers advertise sets, not counts.

use std::collections::HashMap;

use crate::mid::{Mid, Qos};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("local subscription table is full ({0} entries)")]
    LocalTableFull(usize),
    #[error("peer subscription table is full ({0} entries)")]
    PeerTableFull(usize),
}

/// Process-wide table of MIDs local applications currently care about.
#[derive(Debug)]
pub struct LocalSubscriptionTable {
    capacity: usize,
    entries: HashMap<Mid, (Qos, u32)>,
}

impl LocalSubscriptionTable {
    pub fn new(capacity: usize) -> LocalSubscriptionTable {
        LocalSubscriptionTable {
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, mid: Mid) -> bool {
        self.entries.contains_key(&mid)
    }

    pub fn in_use_count(&self, mid: Mid) -> u32 {
        self.entries.get(&mid).map(|(_, c)| *c).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Mid, Qos)> + '_ {
        self.entries.iter().map(|(mid, (qos, _))| (*mid, *qos))
    }

    /// Processes a local SUBSCRIBE report. Returns `true` if this is a
    /// newly-added MID (caller must fan it out to connected peers),
    /// `false` if it only bumped an existing entry's in-use counter.
    pub fn subscribe(&mut self, mid: Mid, qos: Qos) -> Result<bool, SubscriptionError> {
        if let Some((_, count)) = self.entries.get_mut(&mid) {
            *count += 1;
            return Ok(false);
        }

        if self.entries.len() >= self.capacity {
            return Err(SubscriptionError::LocalTableFull(self.capacity));
        }

        self.entries.insert(mid, (qos, 1));
        Ok(true)
    }

    /// Processes a local UNSUBSCRIBE report. Returns `true` if the
    /// in-use counter reached zero and the entry was removed (caller must
    /// fan out an UNSUBSCRIBE to connected peers); `false` if the MID
    /// wasn't subscribed (dropped silently) or the counter is still
    /// positive.
    pub fn unsubscribe(&mut self, mid: Mid) -> bool {
        let Some((_, count)) = self.entries.get_mut(&mid) else {
            return false;
        };

        *count -= 1;
        if *count == 0 {
            self.entries.remove(&mid);
            return true;
        }
        false
    }
}

/// One peer's advertised set of MIDs it wants forwarded to it.
#[derive(Debug)]
pub struct PeerSubscriptionTable {
    capacity: usize,
    entries: HashMap<Mid, Qos>,
}

impl PeerSubscriptionTable {
    pub fn new(capacity: usize) -> PeerSubscriptionTable {
        PeerSubscriptionTable {
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, mid: Mid) -> bool {
        self.entries.contains_key(&mid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Mid, Qos)> + '_ {
        self.entries.iter().map(|(mid, qos)| (*mid, *qos))
    }

    /// Adds a subscription this peer advertised. Returns `Ok(true)` if new,
    /// `Ok(false)` if it's already present (caller should drop-and-log per
    /// spec.md §4.5), `Err` if the table is full.
    pub fn subscribe(&mut self, mid: Mid, qos: Qos) -> Result<bool, SubscriptionError> {
        if self.entries.contains_key(&mid) {
            return Ok(false);
        }
        if self.entries.len() >= self.capacity {
            return Err(SubscriptionError::PeerTableFull(self.capacity));
        }
        self.entries.insert(mid, qos);
        Ok(true)
    }

    /// Removes a subscription this peer advertised going away. Returns
    /// `true` if it was present.
    pub fn unsubscribe(&mut self, mid: Mid) -> bool {
        self.entries.remove(&mid).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_subscribe_then_unsubscribe_round_trips() {
        let mut table = LocalSubscriptionTable::new(4);
        assert!(table.subscribe(Mid(1), Qos::default()).unwrap());
        assert_eq!(table.in_use_count(Mid(1)), 1);

        // A second subscribe on the same MID just bumps the counter.
        assert!(!table.subscribe(Mid(1), Qos::default()).unwrap());
        assert_eq!(table.in_use_count(Mid(1)), 2);

        assert!(!table.unsubscribe(Mid(1)));
        assert_eq!(table.in_use_count(Mid(1)), 1);
        assert!(table.unsubscribe(Mid(1)));
        assert!(!table.contains(Mid(1)));
    }

    #[test]
    fn local_subscribe_refuses_when_full() {
        let mut table = LocalSubscriptionTable::new(1);
        table.subscribe(Mid(1), Qos::default()).unwrap();
        assert!(matches!(
            table.subscribe(Mid(2), Qos::default()),
            Err(SubscriptionError::LocalTableFull(1))
        ));
    }

    #[test]
    fn local_unsubscribe_of_unknown_mid_is_silent() {
        let mut table = LocalSubscriptionTable::new(4);
        assert!(!table.unsubscribe(Mid(99)));
    }

    #[test]
    fn peer_subscribe_rejects_duplicate_without_erroring() {
        let mut table = PeerSubscriptionTable::new(4);
        assert!(table.subscribe(Mid(1), Qos::default()).unwrap());
        assert!(!table.subscribe(Mid(1), Qos::default()).unwrap());
    }

    #[test]
    fn peer_subscribe_refuses_when_full_but_is_a_clean_error() {
        let mut table = PeerSubscriptionTable::new(1);
        table.subscribe(Mid(1), Qos::default()).unwrap();
        assert!(matches!(
            table.subscribe(Mid(2), Qos::default()),
            Err(SubscriptionError::PeerTableFull(1))
        ));
    }
}
