//! Ordered, merged slot range sets owned by one master or one migration route.

use super::distribution::{MAX_SLOT, SlotError, SlotRange};

/// A sorted, non-overlapping collection of slot ranges.
///
/// Adjacent ranges are merged on insert, so `[0,100]` followed by
/// `[101,200]` is stored as the single range `[0,200]`. An insert that
/// overlaps an existing range is rejected and leaves the tracker unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRangeTracker {
    ranges: Vec<SlotRange>,
}

impl SlotRangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from ranges applied in order.
    pub fn from_ranges(ranges: impl IntoIterator<Item = SlotRange>) -> Result<Self, SlotError> {
        let mut tracker = Self::new();
        tracker.extend(ranges)?;
        Ok(tracker)
    }

    /// Insert a range, merging it with any neighbour it touches.
    pub fn add(&mut self, range: SlotRange) -> Result<(), SlotError> {
        if let Some(existing) = self.ranges.iter().find(|r| r.overlaps(&range)) {
            return Err(SlotError::Overlap {
                range,
                existing: *existing,
            });
        }

        let position = self
            .ranges
            .partition_point(|r| r.start() < range.start());
        self.ranges.insert(position, range);
        self.merge_neighbours();
        Ok(())
    }

    /// Add several ranges in argument order.
    ///
    /// Each range is validated and merged before the next one is considered.
    /// The first failure stops the call; ranges added before it stay applied.
    pub fn extend(&mut self, ranges: impl IntoIterator<Item = SlotRange>) -> Result<(), SlotError> {
        for range in ranges {
            self.add(range)?;
        }
        Ok(())
    }

    /// Sorted, merged ranges.
    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    /// True iff the tracker holds exactly `[0, 16383]`.
    pub fn is_fully_covered(&self) -> bool {
        matches!(self.ranges.as_slice(), [only] if only.start() == 0 && only.end() == MAX_SLOT)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn slot_count(&self) -> u32 {
        self.ranges.iter().map(SlotRange::count).sum()
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(slot))
    }

    fn merge_neighbours(&mut self) {
        let mut merged: Vec<SlotRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => match last.merge_adjacent(&range) {
                    Some(joined) => *last = joined,
                    None => merged.push(range),
                },
                None => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}

impl std::fmt::Display for SlotRangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for range in &self.ranges {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{range}")?;
            first = false;
        }
        Ok(())
    }
}
