//! Two-handed clock eviction engine (C4).
//!
//! `original_source/vm/evict.c` is the broken half of the original: its
//! loop body never advances either hand and its victim-relocation
//! dispatch falls off the end of several match arms (note also the
//! `site_t clear_hand` typo — this file does not compile as written). The
//! two-handed clock it is trying to describe is a standard structure,
//! so this module implements that structure directly rather than a
//! translation of the broken C (`spec.md` §9 Open Question 1; see
//! `DESIGN.md`).
//!
//! The clock keeps two cursors over the frame table, both modulo the
//! table's slot count: `evict_hand`, which looks for the next victim, and
//! `clear_hand`, which always stays `threshold` slots ahead clearing
//! access bits as it passes. Because `clear_hand` runs ahead, a page only
//! has its access bit cleared once every full sweep, then has exactly
//! `threshold` slots' worth of accesses to get marked accessed again
//! before `evict_hand` catches up and considers it a victim — the usual
//! clock second-chance window, just paced by two cursors instead of one.

use crate::external::FrameTable;

struct ClockHands {
    evict: usize,
    clear: usize,
    threshold: usize,
}

/// Picks eviction victims by sweeping a frame table with a two-handed
/// clock. Holds no page content itself; [`system::VmSystem`](crate::system::VmSystem)
/// is what turns a chosen victim into an actual write-back.
pub struct EvictionEngine {
    hands: std::sync::Mutex<ClockHands>,
}

impl EvictionEngine {
    pub fn new(frame_count: usize, threshold: Option<usize>) -> Self {
        let threshold = threshold
            .unwrap_or_else(|| crate::config::default_clock_threshold(frame_count))
            .max(1)
            .min(frame_count.max(1));
        EvictionEngine {
            hands: std::sync::Mutex::new(ClockHands {
                evict: 0,
                clear: threshold % frame_count.max(1),
                threshold,
            }),
        }
    }

    /// Returns the slot index of the next victim, pinned before this
    /// returns (`spec.md` §4.4 step 4: "set `frame.pinned = true` and
    /// return it"), or `None` if no unpinned slot is available. Every
    /// occupied, unpinned slot whose accessed bit is set has it cleared as
    /// `clear_hand` passes over it; a slot is chosen as victim the moment
    /// `evict_hand` reaches it unpinned with the accessed bit already
    /// clear. A pinned slot — I/O in flight, or already somebody else's
    /// chosen victim — is never returned (invariant 1, `spec.md` §8). If a
    /// full sweep finds no unpinned-and-unaccessed slot, the first
    /// unpinned slot encountered is evicted anyway so the search always
    /// terminates; if every slot is pinned, `None` is returned and the
    /// caller must wait for one to free up.
    pub fn next_victim(&self, table: &dyn FrameTable) -> Option<usize> {
        let slot_count = table.slot_count();
        if slot_count == 0 {
            return None;
        }

        let mut hands = self.hands.lock().unwrap();
        hands.evict %= slot_count;
        hands.clear %= slot_count;

        let mut steps = 0;
        // First unpinned occupied slot seen this sweep, used as a
        // force-evict fallback if every unpinned slot turns out accessed.
        let mut fallback = None;

        loop {
            if steps > slot_count * 2 {
                return None;
            }

            // clear_hand always runs `threshold` ahead of evict_hand and
            // clears whatever unpinned slot it passes over.
            if let Some((pid, va)) = table.slot_at(hands.clear) {
                if !table.is_pinned(hands.clear) {
                    table.with_entry(pid, va, &mut |e| e.clear_accessed());
                }
            }
            hands.clear = (hands.clear + 1) % slot_count;

            let candidate = hands.evict;
            hands.evict = (hands.evict + 1) % slot_count;
            steps += 1;

            if table.is_pinned(candidate) {
                // Invariant 1 (`spec.md` §8): a pinned slot is never a
                // candidate, full stop — not even as the force-evict
                // fallback below.
                continue;
            }

            let occupied = table.slot_at(candidate).is_some();
            let unaccessed = match table.slot_at(candidate) {
                Some((pid, va)) => {
                    let mut unaccessed = false;
                    table.with_entry(pid, va, &mut |e| unaccessed = !e.is_accessed());
                    unaccessed
                }
                None => false,
            };
            if unaccessed {
                table.set_pinned(candidate, true);
                return Some(candidate);
            }
            if fallback.is_none() && occupied {
                fallback = Some(candidate);
            }

            if steps >= slot_count {
                // Every unpinned occupied slot seen so far was accessed;
                // force-evict the first unpinned one rather than spin
                // indefinitely looking for one that will never appear.
                if let Some(victim) = fallback {
                    table.set_pinned(victim, true);
                    return Some(victim);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{PageTableEntry, Pid};
    use crate::medium::Medium;
    use oscore::addressing::Va;
    use std::sync::Mutex;

    struct FakeEntry {
        medium: Medium,
        accessed: bool,
        dirty: bool,
    }
    impl PageTableEntry for FakeEntry {
        fn medium(&self) -> Medium {
            self.medium
        }
        fn set_medium(&mut self, m: Medium) {
            self.medium = m;
        }
        fn is_accessed(&self) -> bool {
            self.accessed
        }
        fn clear_accessed(&mut self) {
            self.accessed = false;
        }
        fn is_dirty(&self) -> bool {
            self.dirty
        }
        fn clear_dirty(&mut self) {
            self.dirty = false;
        }
        fn set_dirty(&mut self) {
            self.dirty = true;
        }
        fn invalidate(&mut self) {}
        fn install(&mut self, _frame: crate::external::PhysicalFrame) {}
    }

    struct FakeTable {
        entries: Mutex<Vec<FakeEntry>>,
        pinned: Mutex<Vec<bool>>,
    }
    impl FrameTable for FakeTable {
        fn slot_count(&self) -> usize {
            self.entries.lock().unwrap().len()
        }
        fn slot_at(&self, index: usize) -> Option<(Pid, Va)> {
            if index < self.entries.lock().unwrap().len() {
                Some((Pid(0), Va(index * 0x1000)))
            } else {
                None
            }
        }
        fn with_entry(&self, _pid: Pid, va: Va, f: &mut dyn FnMut(&mut dyn PageTableEntry)) -> bool {
            let idx = va.0 / 0x1000;
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(idx) {
                Some(e) => {
                    f(e);
                    true
                }
                None => false,
            }
        }
        fn allocate_frame(&self) -> Option<crate::external::PhysicalFrame> {
            None
        }
        fn free_frame(&self, _frame: crate::external::PhysicalFrame) {}
        fn frame_of(&self, _pid: Pid, _va: Va) -> Option<crate::external::PhysicalFrame> {
            None
        }
        fn read_frame(&self, _frame: crate::external::PhysicalFrame, _buf: &mut [u8; crate::config::PAGE_SIZE]) {}
        fn write_frame(&self, _frame: crate::external::PhysicalFrame, _buf: &[u8; crate::config::PAGE_SIZE]) {}
        fn is_pinned(&self, index: usize) -> bool {
            self.pinned.lock().unwrap().get(index).copied().unwrap_or(false)
        }
        fn set_pinned(&self, index: usize, pinned: bool) {
            if let Some(slot) = self.pinned.lock().unwrap().get_mut(index) {
                *slot = pinned;
            }
        }
    }

    fn table_of(accessed: &[bool]) -> FakeTable {
        FakeTable {
            entries: Mutex::new(
                accessed
                    .iter()
                    .map(|&a| FakeEntry {
                        medium: Medium::Memory,
                        accessed: a,
                        dirty: false,
                    })
                    .collect(),
            ),
            pinned: Mutex::new(vec![false; accessed.len()]),
        }
    }

    #[test]
    fn picks_the_only_unaccessed_slot() {
        let table = table_of(&[true, true, false, true]);
        let engine = EvictionEngine::new(4, Some(1));
        assert_eq!(engine.next_victim(&table), Some(2));
    }

    #[test]
    fn empty_table_has_no_victim() {
        let table = table_of(&[]);
        let engine = EvictionEngine::new(0, None);
        assert_eq!(engine.next_victim(&table), None);
    }

    #[test]
    fn fully_accessed_table_still_terminates() {
        let table = table_of(&[true, true, true]);
        let engine = EvictionEngine::new(3, Some(1));
        assert!(engine.next_victim(&table).is_some());
    }

    #[test]
    fn pinned_slot_is_never_chosen_even_if_unaccessed() {
        let table = table_of(&[false, false]);
        table.set_pinned(0, true);
        let engine = EvictionEngine::new(2, Some(1));
        assert_eq!(engine.next_victim(&table), Some(1));
    }

    #[test]
    fn all_pinned_yields_no_victim() {
        let table = table_of(&[false, false, false]);
        for i in 0..3 {
            table.set_pinned(i, true);
        }
        let engine = EvictionEngine::new(3, Some(1));
        assert_eq!(engine.next_victim(&table), None);
    }

    #[test]
    fn chosen_victim_comes_back_pinned() {
        let table = table_of(&[true, false, true]);
        let engine = EvictionEngine::new(3, Some(1));
        let victim = engine.next_victim(&table).unwrap();
        assert!(table.is_pinned(victim));
    }

    proptest::proptest! {
        /// Invariant 1 (`spec.md` §8): whatever subset of slots is pinned
        /// going in, `next_victim` never returns one of them, for any
        /// pattern of accessed bits and any clock threshold.
        #[test]
        fn invariant1_never_returns_a_pinned_slot(
            accessed in proptest::collection::vec(proptest::bool::ANY, 1..24),
            pinned_mask in proptest::collection::vec(proptest::bool::ANY, 1..24),
            threshold in 1usize..24,
        ) {
            let n = accessed.len().min(pinned_mask.len());
            let accessed = &accessed[..n];
            let pinned_mask = &pinned_mask[..n];
            // Keep at least one unpinned slot, or the property degenerates
            // to the already-covered `all_pinned_yields_no_victim` case.
            if pinned_mask.iter().all(|&p| p) {
                return Ok(());
            }

            let table = table_of(accessed);
            for (i, &p) in pinned_mask.iter().enumerate() {
                table.set_pinned(i, p);
            }
            let engine = EvictionEngine::new(n, Some(threshold.min(n).max(1)));

            if let Some(victim) = engine.next_victim(&table) {
                proptest::prop_assert!(!pinned_mask[victim]);
            }
        }

        /// Repeatedly selecting victims without ever unpinning them must
        /// visit every unpinned slot at most once before returning `None`
        /// — no slot is ever handed out twice while still pinned from a
        /// previous selection.
        #[test]
        fn invariant1_successive_selections_never_repeat_a_pinned_victim(
            accessed in proptest::collection::vec(proptest::bool::ANY, 2..16),
        ) {
            let n = accessed.len();
            let table = table_of(&accessed);
            let engine = EvictionEngine::new(n, Some(1));

            let mut seen = std::collections::HashSet::new();
            loop {
                match engine.next_victim(&table) {
                    Some(v) => {
                        proptest::prop_assert!(seen.insert(v), "slot {} returned twice while still pinned", v);
                    }
                    None => break,
                }
                if seen.len() == n {
                    break;
                }
            }
        }
    }
}
