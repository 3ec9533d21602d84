//! Fixed-capacity ring buffers for retained-sent and deferred-received
//! frames (spec.md §3, §4.6, §4.7).
//!
//! The original C implementation (`SBN_PeerMsgBuf_t` in
//! `sbn_interfaces.h`) uses a fixed array plus add/oldest indices and a
//! per-slot retransmit counter. §9's design notes call for the same thing
//! reimplemented as "a fixed-capacity ring with explicit overwrite-oldest
//! semantics and explicit 'find by sequence' (linear scan acceptable given
//! capacity <= 256)" — that is exactly what these two types do.

/// One retained sent frame, indexed by the sequence number it was sent
/// with.
#[derive(Debug, Clone)]
struct SendSlot {
    seq: u32,
    frame: Vec<u8>,
    retransmit_count: u32,
}

/// Bounded ring of recently-sent wire frames. Used to serve retransmit
/// requests (NACK). Oldest frame is overwritten when full.
#[derive(Debug)]
pub struct SendRing {
    capacity: usize,
    slots: Vec<Option<SendSlot>>,
}

impl SendRing {
    pub fn new(capacity: usize) -> SendRing {
        assert!(capacity > 0, "SendRing capacity must be positive");
        SendRing {
            capacity,
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores `frame` at `seq`'s slot, overwriting whatever was there
    /// (which is, by construction, `capacity` sequence numbers older).
    pub fn insert(&mut self, seq: u32, frame: Vec<u8>) {
        let idx = (seq as usize) % self.capacity;
        self.slots[idx] = Some(SendSlot {
            seq,
            frame,
            retransmit_count: 0,
        });
    }

    /// Finds the frame stored at `seq`, if the slot still holds that exact
    /// sequence number (it may have been overwritten by a newer send that
    /// landed on the same slot).
    pub fn get(&self, seq: u32) -> Option<&[u8]> {
        self.find_slot(seq).map(|s| s.frame.as_slice())
    }

    /// Retransmit-ceiling-gated lookup: returns the frame to resend and
    /// bumps its retransmit counter, or `None` if the slot is stale/absent
    /// or the ceiling has been reached.
    pub fn take_for_retransmit(&mut self, seq: u32, ceiling: u32) -> Option<Vec<u8>> {
        let idx = (seq as usize) % self.capacity;
        let slot = self.slots[idx].as_mut()?;
        if slot.seq != seq || slot.retransmit_count >= ceiling {
            return None;
        }
        slot.retransmit_count += 1;
        Some(slot.frame.clone())
    }

    fn find_slot(&self, seq: u32) -> Option<&SendSlot> {
        let idx = (seq as usize) % self.capacity;
        self.slots[idx].as_ref().filter(|s| s.seq == seq)
    }

    /// Drops every retained entry with sequence `<= seq` (ACK handling).
    /// An ACK(seq') with seq' >= a prior ACK(seq) is equivalent to just
    /// ACK(seq') alone, because dropping is monotonic: already-dropped
    /// slots simply stay dropped.
    pub fn ack_through(&mut self, seq: u32) {
        for slot in self.slots.iter_mut() {
            if let Some(s) = slot {
                if s.seq <= seq {
                    *slot = None;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

/// One received-but-not-yet-deliverable frame.
#[derive(Debug, Clone)]
struct DeferredSlot {
    seq: u32,
    frame: Vec<u8>,
}

/// Bounded ring of out-of-order received frames, drained in ascending
/// sequence order as the missing sequence numbers arrive.
#[derive(Debug)]
pub struct DeferredRing {
    capacity: usize,
    slots: Vec<Option<DeferredSlot>>,
}

impl DeferredRing {
    pub fn new(capacity: usize) -> DeferredRing {
        assert!(capacity > 0, "DeferredRing capacity must be positive");
        DeferredRing {
            capacity,
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a frame received out of order. If the ring is full, the
    /// slot holding the oldest (lowest-sequence) frame is overwritten —
    /// the explicit policy from spec.md §7/§8.
    pub fn insert(&mut self, seq: u32, frame: Vec<u8>) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(DeferredSlot { seq, frame });
            return;
        }

        let oldest_idx = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.as_ref().map(|s| s.seq).unwrap_or(u32::MAX))
            .map(|(i, _)| i)
            .expect("capacity is always > 0");

        self.slots[oldest_idx] = Some(DeferredSlot { seq, frame });
    }

    /// Removes and returns every frame whose sequence is `< next_expected`,
    /// in ascending sequence order. The DeferredRing invariant (spec.md §3)
    /// is that it never holds a frame with sequence `<= next_expected`
    /// once this has run with the post-advance value of `next_expected`.
    pub fn drain_ready(&mut self, next_expected: u32) -> Vec<(u32, Vec<u8>)> {
        let mut ready = Vec::new();
        let mut expected = next_expected;

        loop {
            let found = self.slots.iter_mut().find(|s| {
                s.as_ref()
                    .map(|slot| slot.seq == expected)
                    .unwrap_or(false)
            });

            match found {
                Some(slot) => {
                    let taken = slot.take().unwrap();
                    ready.push((taken.seq, taken.frame));
                    expected = expected.wrapping_add(1);
                }
                None => break,
            }
        }

        ready
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_ring_serves_retained_frame() {
        let mut ring = SendRing::new(4);
        ring.insert(0, vec![1, 2, 3]);
        assert_eq!(ring.get(0), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn send_ring_overwrites_oldest_when_full() {
        let mut ring = SendRing::new(8);
        for seq in 0..32u32 {
            ring.insert(seq, vec![seq as u8]);
        }
        // seq 0 landed on the same slot as 8, 16, 24 and has been overwritten.
        assert_eq!(ring.get(0), None);
        assert_eq!(ring.take_for_retransmit(0, 5), None);
        assert_eq!(ring.get(31), Some(&[31u8][..]));
    }

    #[test]
    fn ack_through_is_monotonic_idempotent() {
        let mut ring = SendRing::new(8);
        for seq in 0..5u32 {
            ring.insert(seq, vec![seq as u8]);
        }
        ring.ack_through(2);
        assert_eq!(ring.get(0), None);
        assert_eq!(ring.get(1), None);
        assert_eq!(ring.get(2), None);
        assert!(ring.get(3).is_some());

        // A later ACK with a higher sequence subsumes the earlier one.
        ring.ack_through(4);
        assert_eq!(ring.get(3), None);
        assert_eq!(ring.get(4), None);
    }

    #[test]
    fn retransmit_respects_ceiling() {
        let mut ring = SendRing::new(4);
        ring.insert(1, vec![9]);
        assert!(ring.take_for_retransmit(1, 2).is_some());
        assert!(ring.take_for_retransmit(1, 2).is_some());
        assert_eq!(ring.take_for_retransmit(1, 2), None);
    }

    #[test]
    fn deferred_ring_drains_in_ascending_order_once_contiguous() {
        let mut ring = DeferredRing::new(8);
        ring.insert(4, vec![4]);
        ring.insert(3, vec![3]);

        assert!(ring.drain_ready(2).is_empty());

        let drained = ring.drain_ready(3);
        assert_eq!(
            drained.into_iter().map(|(s, _)| s).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert!(ring.is_empty());
    }

    #[test]
    fn deferred_ring_overwrites_oldest_when_full() {
        let mut ring = DeferredRing::new(2);
        ring.insert(10, vec![]);
        ring.insert(11, vec![]);
        ring.insert(12, vec![]); // overwrites seq 10, the oldest

        let drained = ring.drain_ready(11);
        assert_eq!(
            drained.into_iter().map(|(s, _)| s).collect::<Vec<_>>(),
            vec![11, 12]
        );
    }
}
