//! Sparse sets of closed command-id intervals.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::serial::{self, CommandId};

/// A closed interval `[lower, upper]` of command ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    lower: CommandId,
    upper: CommandId,
}

impl Range {
    /// Returns `None` when `lower` is serially after `upper`.
    pub fn new(lower: CommandId, upper: CommandId) -> Option<Self> {
        if serial::gt(lower, upper) {
            return None;
        }
        Some(Self { lower, upper })
    }

    pub fn single(id: CommandId) -> Self {
        Self {
            lower: id,
            upper: id,
        }
    }

    pub fn lower(&self) -> CommandId {
        self.lower
    }

    pub fn upper(&self) -> CommandId {
        self.upper
    }

    pub fn includes(&self, id: CommandId) -> bool {
        serial::le(self.lower, id) && serial::le(id, self.upper)
    }

    pub fn includes_range(&self, other: &Range) -> bool {
        self.includes(other.lower) && self.includes(other.upper)
    }

    pub fn intersects(&self, other: &Range) -> bool {
        self.includes(other.lower)
            || self.includes(other.upper)
            || other.includes(self.lower)
            || other.includes(self.upper)
    }

    /// Overlapping or directly adjacent.
    pub fn touches(&self, other: &Range) -> bool {
        self.intersects(other)
            || self.includes(other.upper.next())
            || self.includes(other.lower.prev())
            || other.includes(self.upper.next())
            || other.includes(self.lower.prev())
    }

    pub fn span(&self, other: &Range) -> Range {
        Range {
            lower: serial::min(self.lower, other.lower),
            upper: serial::max(self.upper, other.upper),
        }
    }

    /// Number of ids covered.
    pub fn count(&self) -> u64 {
        u64::from(self.upper.offset_from(self.lower)) + 1
    }

    /// The parts of `self` not covered by `other` (zero, one or two ranges).
    pub fn subtract(&self, other: &Range) -> Vec<Range> {
        if !self.intersects(other) {
            return vec![*self];
        }
        let mut remaining = Vec::with_capacity(2);
        if serial::lt(self.lower, other.lower) {
            remaining.push(Range {
                lower: self.lower,
                upper: other.lower.prev(),
            });
        }
        if serial::gt(self.upper, other.upper) {
            remaining.push(Range {
                lower: other.upper.next(),
                upper: self.upper,
            });
        }
        remaining
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ordered, merged, non-overlapping set of [`Range`]s.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_range(range: Range) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    pub fn add(&mut self, lower: CommandId, upper: CommandId) {
        match Range::new(lower, upper) {
            Some(range) => self.add_range(range),
            None => debug_assert!(false, "reversed range [{lower}, {upper}]"),
        }
    }

    pub fn add_id(&mut self, id: CommandId) {
        self.add_range(Range::single(id));
    }

    pub fn add_range(&mut self, range: Range) {
        let mut merged = range;
        let mut idx = 0;
        while idx < self.ranges.len() {
            let existing = self.ranges[idx];
            if merged.touches(&existing) {
                merged = merged.span(&existing);
                self.ranges.remove(idx);
            } else if serial::lt(merged.upper, existing.lower) {
                self.ranges.insert(idx, merged);
                return;
            } else {
                idx += 1;
            }
        }
        self.ranges.push(merged);
    }

    pub fn subtract(&mut self, other: &RangeSet) {
        for removed in &other.ranges {
            self.ranges = self
                .ranges
                .iter()
                .flat_map(|range| range.subtract(removed))
                .collect();
        }
    }

    pub fn first(&self) -> Option<Range> {
        self.ranges.first().copied()
    }

    pub fn last(&self) -> Option<Range> {
        self.ranges.last().copied()
    }

    pub fn includes(&self, id: CommandId) -> bool {
        self.ranges.iter().any(|range| range.includes(id))
    }

    /// Number of disjoint intervals.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Independent snapshot, safe to hand across a lock boundary.
    pub fn copy(&self) -> RangeSet {
        self.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }
}

impl fmt::Debug for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ranges.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl FromIterator<Range> for RangeSet {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        let mut set = RangeSet::new();
        for range in iter {
            set.add_range(range);
        }
        set
    }
}
