//! Dense membership set over the whole slot space.

use super::distribution::{SlotRange, TOTAL_SLOTS};
use super::tracker::SlotRangeTracker;

const WORD_BITS: usize = 64;
const WORDS: usize = TOTAL_SLOTS as usize / WORD_BITS;

/// One bit per slot: bit `slot % 64` of word `slot / 64`.
#[derive(Clone, PartialEq, Eq)]
pub struct SlotBitset {
    words: [u64; WORDS],
}

impl Default for SlotBitset {
    fn default() -> Self {
        Self { words: [0; WORDS] }
    }
}

impl SlotBitset {
    pub fn new() -> Self {
        Self::default()
    }

    fn locate(slot: u16) -> (usize, u64) {
        let slot = usize::from(slot);
        (slot / WORD_BITS, 1u64 << (slot % WORD_BITS))
    }

    /// Set a slot. Returns false if it was already set or is out of range.
    pub fn insert(&mut self, slot: u16) -> bool {
        let (word, mask) = Self::locate(slot);
        match self.words.get_mut(word) {
            Some(w) if *w & mask == 0 => {
                *w |= mask;
                true
            }
            _ => false,
        }
    }

    /// Clear a slot. Returns true if it was set.
    pub fn remove(&mut self, slot: u16) -> bool {
        let (word, mask) = Self::locate(slot);
        match self.words.get_mut(word) {
            Some(w) if *w & mask != 0 => {
                *w &= !mask;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, slot: u16) -> bool {
        let (word, mask) = Self::locate(slot);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    pub fn insert_range(&mut self, range: SlotRange) {
        for slot in range.iter() {
            self.insert(slot);
        }
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate set slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..TOTAL_SLOTS).filter(|slot| self.contains(*slot))
    }

    /// Compact the set into merged, ascending ranges.
    pub fn ranges(&self) -> Vec<SlotRange> {
        let mut ranges = Vec::new();
        let mut run: Option<(u16, u16)> = None;

        for slot in self.iter() {
            run = match run {
                Some((start, end)) if end + 1 == slot => Some((start, slot)),
                Some((start, end)) => {
                    ranges.extend(SlotRange::new(start, end).ok());
                    Some((slot, slot))
                }
                None => Some((slot, slot)),
            };
        }
        if let Some((start, end)) = run {
            ranges.extend(SlotRange::new(start, end).ok());
        }
        ranges
    }
}

impl From<&SlotRangeTracker> for SlotBitset {
    fn from(tracker: &SlotRangeTracker) -> Self {
        let mut bitset = Self::new();
        for range in tracker.ranges() {
            bitset.insert_range(*range);
        }
        bitset
    }
}

impl std::fmt::Debug for SlotBitset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotBitset")
            .field("len", &self.len())
            .field("ranges", &self.ranges())
            .finish()
    }
}
