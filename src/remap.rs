//! RemapTable (spec.md §3, §6): per-destination MID mapping/drop policy.
//!
//! Grounded in `modules/filter/remap/fsw/src/sbn_f_remap.c`: a sorted list
//! of `(processor_id, from_mid) -> to_mid` rows plus a default action for
//! MIDs with no matching row. A `to_mid` of zero means DROP (spec.md §6
//! resolves the ambiguity the original source left open in favor of DROP).
//! The table is kept sorted and unique on `(processor_id, from_mid)` after
//! every mutation (spec.md §3 invariant, §8 testable property).

use crate::mid::Mid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapAction {
    Drop,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemapRow {
    processor_id: u32,
    from_mid: Mid,
    to_mid: Mid,
}

/// Outcome of looking up a MID for a given destination processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapOutcome {
    /// Forward using this MID instead.
    Remap(Mid),
    /// Drop the message for this destination.
    Drop,
    /// No matching row; fall back to the table's default action.
    PassThrough(Mid),
}

/// Sorted, unique-keyed table of MID remaps, guarded by callers with a
/// single `RwLock`/`Mutex` per spec.md §5 ("The RemapTable has its own
/// mutex; reads take it briefly during filter evaluation.") — the lock
/// itself lives in `App`, this type is the data structure it protects.
#[derive(Debug)]
pub struct RemapTable {
    default_action: RemapAction,
    rows: Vec<RemapRow>,
}

impl RemapTable {
    pub fn new(default_action: RemapAction) -> RemapTable {
        RemapTable {
            default_action,
            rows: Vec::new(),
        }
    }

    pub fn default_action(&self) -> RemapAction {
        self.default_action
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn key(processor_id: u32, from_mid: Mid) -> (u32, Mid) {
        (processor_id, from_mid)
    }

    fn search(&self, processor_id: u32, from_mid: Mid) -> Result<usize, usize> {
        self.rows
            .binary_search_by_key(&Self::key(processor_id, from_mid), |r| {
                Self::key(r.processor_id, r.from_mid)
            })
    }

    /// Inserts or replaces the row for `(processor_id, from_mid)`. `to_mid
    /// == 0` means DROP. Keeps `rows` sorted and unique on
    /// `(processor_id, from_mid)`.
    pub fn upsert(&mut self, processor_id: u32, from_mid: Mid, to_mid: Mid) {
        let row = RemapRow {
            processor_id,
            from_mid,
            to_mid,
        };
        match self.search(processor_id, from_mid) {
            Ok(idx) => self.rows[idx] = row,
            Err(idx) => self.rows.insert(idx, row),
        }
    }

    pub fn remove(&mut self, processor_id: u32, from_mid: Mid) -> bool {
        match self.search(processor_id, from_mid) {
            Ok(idx) => {
                self.rows.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn lookup(&self, processor_id: u32, from_mid: Mid) -> RemapOutcome {
        match self.search(processor_id, from_mid) {
            Ok(idx) => {
                let to_mid = self.rows[idx].to_mid;
                if to_mid.0 == 0 {
                    RemapOutcome::Drop
                } else {
                    RemapOutcome::Remap(to_mid)
                }
            }
            Err(_) => match self.default_action {
                RemapAction::PassThrough => RemapOutcome::PassThrough(from_mid),
                RemapAction::Drop => RemapOutcome::Drop,
            },
        }
    }

    #[cfg(test)]
    fn is_sorted_and_unique(&self) -> bool {
        self.rows
            .windows(2)
            .all(|w| Self::key(w[0].processor_id, w[0].from_mid) < Self::key(w[1].processor_id, w[1].from_mid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_default_action_when_no_row_matches() {
        let table = RemapTable::new(RemapAction::PassThrough);
        assert_eq!(table.lookup(1, Mid(0x0811)), RemapOutcome::PassThrough(Mid(0x0811)));
    }

    #[test]
    fn lookup_with_no_matching_row_honors_drop_default() {
        let table = RemapTable::new(RemapAction::Drop);
        assert_eq!(table.lookup(1, Mid(0x0811)), RemapOutcome::Drop);
    }

    #[test]
    fn zero_to_mid_means_drop() {
        let mut table = RemapTable::new(RemapAction::PassThrough);
        table.upsert(2, Mid(0x18FA), Mid(0));
        assert_eq!(table.lookup(2, Mid(0x18FA)), RemapOutcome::Drop);
    }

    #[test]
    fn nonzero_to_mid_remaps() {
        let mut table = RemapTable::new(RemapAction::Drop);
        table.upsert(2, Mid(0x100), Mid(0x200));
        assert_eq!(table.lookup(2, Mid(0x100)), RemapOutcome::Remap(Mid(0x200)));
    }

    #[test]
    fn table_stays_sorted_and_unique_after_arbitrary_mutations() {
        let mut table = RemapTable::new(RemapAction::Drop);
        table.upsert(5, Mid(10), Mid(20));
        table.upsert(1, Mid(99), Mid(1));
        table.upsert(5, Mid(1), Mid(2));
        table.upsert(5, Mid(10), Mid(30)); // replace existing key
        assert!(table.is_sorted_and_unique());
        assert_eq!(table.len(), 3);

        table.remove(1, Mid(99));
        assert!(table.is_sorted_and_unique());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_of_absent_row_is_a_no_op() {
        let mut table = RemapTable::new(RemapAction::Drop);
        assert!(!table.remove(1, Mid(1)));
    }
}
