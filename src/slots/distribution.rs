//! Slot space primitives and the even slot distribution.
//!
//! All functions in this module are pure and side-effect free. A [`SlotRange`]
//! can only be built through checked constructors, so every value in the
//! program is an inclusive range inside `0..=16383`.

use std::str::FromStr;

use thiserror::Error;

/// Total number of hash slots in a Valkey cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// Highest valid slot number.
pub const MAX_SLOT: u16 = TOTAL_SLOTS - 1;

/// Errors raised when building or combining slot ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot range {start}-{end} is outside 0-16383")]
    OutOfBounds { start: u32, end: u32 },

    #[error("slot range start {start} is greater than end {end}")]
    Inverted { start: u32, end: u32 },

    #[error("slot range {range} overlaps existing range {existing}")]
    Overlap {
        range: SlotRange,
        existing: SlotRange,
    },

    #[error("malformed slot token: {0}")]
    Malformed(String),
}

/// A contiguous range of hash slots [start, end] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRange {
    start: u16,
    end: u16,
}

impl SlotRange {
    /// Create a new slot range, rejecting inverted or out-of-bounds bounds.
    pub fn new(start: u16, end: u16) -> Result<Self, SlotError> {
        Self::checked(u32::from(start), u32::from(end))
    }

    /// Build a range from wide integers, as read from untrusted text.
    pub fn checked(start: u32, end: u32) -> Result<Self, SlotError> {
        if start > end {
            return Err(SlotError::Inverted { start, end });
        }
        match (u16::try_from(start), u16::try_from(end)) {
            (Ok(s), Ok(e)) if e <= MAX_SLOT => Ok(Self { start: s, end: e }),
            _ => Err(SlotError::OutOfBounds { start, end }),
        }
    }

    /// Create a single-slot range.
    pub fn single(slot: u16) -> Result<Self, SlotError> {
        Self::new(slot, slot)
    }

    /// The whole slot space, `[0, 16383]`.
    pub const fn full() -> Self {
        Self {
            start: 0,
            end: MAX_SLOT,
        }
    }

    pub const fn start(&self) -> u16 {
        self.start
    }

    pub const fn end(&self) -> u16 {
        self.end
    }

    /// Get the number of slots in this range.
    pub fn count(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// Check if this range contains a specific slot.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Closed-interval overlap test.
    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Join two ranges when `other` starts right after `self` ends.
    pub fn merge_adjacent(&self, other: &SlotRange) -> Option<SlotRange> {
        (u32::from(self.end) + 1 == u32::from(other.start)).then_some(SlotRange {
            start: self.start,
            end: other.end,
        })
    }

    /// Iterate over all slots in this range.
    pub fn iter(&self) -> impl Iterator<Item = u16> + use<> {
        self.start..=self.end
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for SlotRange {
    type Err = SlotError;

    /// Parse `a-b` or a bare slot number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = |part: &str| -> Result<u32, SlotError> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SlotError::Malformed(s.to_string()));
            }
            part.parse()
                .map_err(|_| SlotError::Malformed(s.to_string()))
        };

        match s.split_once('-') {
            Some((start, end)) => Self::checked(number(start)?, number(end)?),
            None => {
                let slot = number(s)?;
                Self::checked(slot, slot)
            }
        }
    }
}

/// Calculate the desired slot distribution for `master_count` masters.
///
/// Ranges are contiguous and gapless. The first `16384 % master_count`
/// ranges receive one extra slot.
///
/// # Examples
///
/// ```
/// use valkey_scaler::slots::{SlotRange, desired_slot_ranges};
///
/// let dist = desired_slot_ranges(3);
/// assert_eq!(dist[0], SlotRange::new(0, 5461).unwrap());
/// assert_eq!(dist[1], SlotRange::new(5462, 10922).unwrap());
/// assert_eq!(dist[2], SlotRange::new(10923, 16383).unwrap());
/// ```
pub fn desired_slot_ranges(master_count: usize) -> Vec<SlotRange> {
    if master_count == 0 {
        return Vec::new();
    }

    let total = usize::from(TOTAL_SLOTS);
    // More masters than slots cannot be given a range each.
    let master_count = master_count.min(total);
    let slots_per_master = total / master_count;
    let remainder = total % master_count;

    let mut ranges = Vec::with_capacity(master_count);
    let mut start = 0usize;

    for i in 0..master_count {
        let extra = usize::from(i < remainder);
        let end = start + slots_per_master + extra - 1;

        // Bounds hold by construction: the last end is exactly MAX_SLOT.
        ranges.push(SlotRange {
            start: start as u16,
            end: end as u16,
        });
        start = end + 1;
    }

    ranges
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range_new() {
        let range = SlotRange::new(0, 5461).unwrap();
        assert_eq!(range.start(), 0);
        assert_eq!(range.end(), 5461);
    }

    #[test]
    fn test_slot_range_rejects_inverted() {
        assert_eq!(
            SlotRange::new(10, 5),
            Err(SlotError::Inverted { start: 10, end: 5 })
        );
    }

    #[test]
    fn test_slot_range_rejects_out_of_bounds() {
        assert!(matches!(
            SlotRange::new(0, 16384),
            Err(SlotError::OutOfBounds { .. })
        ));
        assert!(SlotRange::checked(70000, 70001).is_err());
        assert!(SlotRange::new(16383, 16383).is_ok());
    }

    #[test]
    fn test_slot_range_count() {
        assert_eq!(SlotRange::new(0, 5461).unwrap().count(), 5462);
        assert_eq!(SlotRange::single(100).unwrap().count(), 1);
        assert_eq!(SlotRange::full().count(), 16384);
    }

    #[test]
    fn test_slot_range_overlaps() {
        let range = SlotRange::new(100, 200).unwrap();
        assert!(range.overlaps(&SlotRange::new(200, 300).unwrap()));
        assert!(range.overlaps(&SlotRange::new(0, 100).unwrap()));
        assert!(range.overlaps(&SlotRange::new(120, 130).unwrap()));
        assert!(!range.overlaps(&SlotRange::new(201, 300).unwrap()));
        assert!(!range.overlaps(&SlotRange::new(0, 99).unwrap()));
    }

    #[test]
    fn test_slot_range_merge_adjacent() {
        let a = SlotRange::new(0, 100).unwrap();
        let b = SlotRange::new(101, 200).unwrap();
        assert_eq!(a.merge_adjacent(&b), Some(SlotRange::new(0, 200).unwrap()));
        assert_eq!(b.merge_adjacent(&a), None);
    }

    #[test]
    fn test_slot_range_parse() {
        assert_eq!("0-5460".parse(), Ok(SlotRange::new(0, 5460).unwrap()));
        assert_eq!("5461".parse(), Ok(SlotRange::single(5461).unwrap()));
        assert!("16384".parse::<SlotRange>().is_err());
        assert!("10-5".parse::<SlotRange>().is_err());
        assert!("+5".parse::<SlotRange>().is_err());
        assert!("abc".parse::<SlotRange>().is_err());
        assert!("[5->-abc]".parse::<SlotRange>().is_err());
    }

    #[test]
    fn test_slot_range_display() {
        assert_eq!(SlotRange::new(0, 5461).unwrap().to_string(), "0-5461");
        assert_eq!(SlotRange::single(100).unwrap().to_string(), "100");
    }

    #[test]
    fn test_desired_slot_ranges_zero_masters() {
        assert!(desired_slot_ranges(0).is_empty());
    }

    #[test]
    fn test_desired_slot_ranges_one_master() {
        assert_eq!(desired_slot_ranges(1), vec![SlotRange::full()]);
    }

    #[test]
    fn test_desired_slot_ranges_three_masters() {
        let dist = desired_slot_ranges(3);
        assert_eq!(
            dist,
            vec![
                SlotRange::new(0, 5461).unwrap(),
                SlotRange::new(5462, 10922).unwrap(),
                SlotRange::new(10923, 16383).unwrap(),
            ]
        );
    }

    #[test]
    fn test_desired_slot_ranges_sixteen_masters() {
        let dist = desired_slot_ranges(16);
        assert_eq!(dist.len(), 16);
        assert!(dist.iter().all(|r| r.count() == 1024));
    }

    #[test]
    fn test_desired_slot_ranges_contiguous() {
        for master_count in 1..=20 {
            let dist = desired_slot_ranges(master_count);
            let total: u32 = dist.iter().map(SlotRange::count).sum();
            assert_eq!(total, 16384, "master_count={master_count}");
            assert_eq!(dist.first().unwrap().start(), 0);
            assert_eq!(dist.last().unwrap().end(), MAX_SLOT);
            for pair in dist.windows(2) {
                assert_eq!(pair[1].start(), pair[0].end() + 1);
            }
        }
    }
}
