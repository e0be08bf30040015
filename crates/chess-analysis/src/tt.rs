//! Transposition table.
//!
//! Fixed number of slots, one entry each, indexed by `key % capacity`.
//! An incoming entry replaces the stored one when it was searched at least
//! as deep, or when the stored entry belongs to an older generation.

use crate::Move;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

/// How a stored score relates to the true value of the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Exact,
    /// The true score is at least this high (beta cutoff).
    Lower,
    /// The true score is at most this high (no move raised alpha).
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtEntry {
    pub key: u64,
    pub depth: u32,
    pub score: i32,
    pub bound: Bound,
    pub best_move: Option<Move>,
    generation: u8,
}

pub struct TranspositionTable {
    slots: RwLock<Vec<Option<TtEntry>>>,
    generation: AtomicU8,
}

impl TranspositionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; capacity.max(1)]),
            generation: AtomicU8::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn index(key: u64, capacity: usize) -> usize {
        (key % capacity as u64) as usize
    }

    pub fn probe(&self, key: u64) -> Option<TtEntry> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots[Self::index(key, slots.len())].filter(|entry| entry.key == key)
    }

    pub fn store(&self, key: u64, depth: u32, bound: Bound, score: i32, best_move: Option<Move>) {
        let generation = self.generation.load(Ordering::Relaxed);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let index = Self::index(key, slots.len());
        let slot = &mut slots[index];

        let replace = match slot {
            None => true,
            Some(old) => depth >= old.depth || old.generation != generation,
        };
        if replace {
            *slot = Some(TtEntry {
                key,
                depth,
                score,
                bound,
                best_move,
                generation,
            });
        }
    }

    /// Empty every slot.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.iter_mut().for_each(|slot| *slot = None);
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Age existing entries so that new results may replace deeper old ones.
    pub fn new_generation(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u8 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shakmaty::{Color, Role, Square};

    fn e2e4() -> Move {
        Move::new(Square::E2, Square::E4, Role::Pawn.of(Color::White))
    }

    #[test]
    fn test_probe_misses_on_empty_and_on_key_mismatch() {
        let tt = TranspositionTable::new(16);
        assert!(tt.probe(5).is_none());
        tt.store(5, 2, Bound::Exact, 10, None);
        // 21 shares slot 5 but is a different position.
        assert!(tt.probe(21).is_none());
        assert_eq!(tt.probe(5).unwrap().score, 10);
    }

    #[test]
    fn test_shallower_result_does_not_replace_deeper() {
        let tt = TranspositionTable::new(64);
        tt.store(7, 5, Bound::Exact, 40, Some(e2e4()));
        tt.store(7, 3, Bound::Lower, -10, None);

        let entry = tt.probe(7).unwrap();
        assert_eq!(entry.depth, 5);
        assert_eq!(entry.score, 40);
        assert_eq!(entry.best_move, Some(e2e4()));
    }

    #[test]
    fn test_older_generation_is_replaced() {
        let tt = TranspositionTable::new(64);
        tt.store(7, 5, Bound::Exact, 40, None);
        tt.new_generation();
        tt.store(7, 1, Bound::Upper, -3, None);
        assert_eq!(tt.probe(7).unwrap().depth, 1);
    }

    #[test]
    fn test_colliding_key_evicts_when_deep_enough() {
        let tt = TranspositionTable::new(8);
        tt.store(3, 2, Bound::Exact, 1, None);
        tt.store(11, 2, Bound::Exact, 2, None);
        assert!(tt.probe(3).is_none());
        assert_eq!(tt.probe(11).unwrap().score, 2);
    }

    #[test]
    fn test_clear_empties_table() {
        let tt = TranspositionTable::new(32);
        for key in 0..10 {
            tt.store(key, 1, Bound::Exact, 0, None);
        }
        assert_eq!(tt.len(), 10);
        tt.clear();
        assert!(tt.is_empty());
        assert_eq!(tt.capacity(), 32);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let tt = TranspositionTable::new(0);
        tt.store(99, 1, Bound::Exact, 5, None);
        assert_eq!(tt.probe(99).unwrap().score, 5);
    }

    proptest! {
        #[test]
        fn test_store_then_probe_is_at_least_as_deep(
            key in any::<u64>(),
            depth in 0u32..64,
            score in -1_000_000i32..1_000_000,
        ) {
            let tt = TranspositionTable::new(1024);
            tt.store(key, depth, Bound::Exact, score, None);
            let entry = tt.probe(key).unwrap();
            prop_assert!(entry.depth >= depth);
            prop_assert_eq!(entry.score, score);
        }

        #[test]
        fn test_deeper_entry_survives_shallower_store(
            key in any::<u64>(),
            deep in 1u32..64,
            delta in 1u32..64,
        ) {
            let tt = TranspositionTable::new(1024);
            tt.store(key, deep, Bound::Exact, 1, None);
            tt.store(key, deep.saturating_sub(delta), Bound::Lower, 2, None);
            let entry = tt.probe(key).unwrap();
            prop_assert_eq!(entry.depth, deep);
            prop_assert_eq!(entry.score, 1);
        }
    }
}
