//! Two-level link sequence numbers.

use serde::Deserialize;
use serde::Serialize;

/// Sequence number guarding one side of a ring edge.
///
/// The pair `(repair, seq)` is ordered lexicographically (derived `Ord` on
/// field order). Normal operations advance `seq`; a link repair advances
/// `repair` and resets `seq`, so every message from a pre-repair generation
/// compares stale no matter how large its `seq` component is.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LinkSeq {
    /// Repair generation.
    pub repair: u32,
    /// Sequence within the generation.
    pub seq: u32,
}

impl LinkSeq {
    /// The initial sequence.
    pub const ZERO: LinkSeq = LinkSeq { repair: 0, seq: 0 };

    /// Construct from parts.
    pub fn new(repair: u32, seq: u32) -> Self {
        Self { repair, seq }
    }

    /// The next sequence within the current repair generation.
    pub fn next(self) -> Self {
        Self {
            repair: self.repair,
            seq: self.seq + 1,
        }
    }

    /// The first sequence of the next repair generation.
    pub fn gnext(self) -> Self {
        Self {
            repair: self.repair + 1,
            seq: 0,
        }
    }
}

impl std::fmt::Display for LinkSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.repair, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_lexicographic() {
        let s = LinkSeq::ZERO;
        assert!(s.next() > s);
        assert!(s.next().next() > s.next());
        // A generation bump dominates any seq within the old generation.
        assert!(s.gnext() > s.next().next().next());
        assert_eq!(s.gnext(), LinkSeq::new(1, 0));
        assert_eq!(s.gnext().next(), LinkSeq::new(1, 1));
    }
}
