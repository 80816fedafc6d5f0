//! Links and local node state.

use serde::Deserialize;
use serde::Serialize;

use super::key::DdllKey;
use super::key::PeerId;
use super::neighbors::NeighborSet;
use super::seq::LinkSeq;

/// An addressable reference to a ring member: the hosting peer's endpoint
/// plus the member's key. Links are relations, not ownership: a remote node
/// is only ever addressed, never held.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Endpoint of the peer hosting the member.
    pub addr: PeerId,
    /// The member's key.
    pub key: DdllKey,
}

impl Link {
    /// Create a new link.
    pub fn new(addr: PeerId, key: DdllKey) -> Self {
        Self { addr, key }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}", self.key, self.addr)
    }
}

/// Membership status of a local node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Not a ring member.
    Out,
    /// Insertion in progress.
    Ins,
    /// Deletion in progress.
    Del,
    /// Fully inserted.
    In,
}

impl Status {
    /// `In` and `Del` both count as logically present, so a delete-in-progress
    /// node still serves protocol requests.
    pub fn is_inserted(&self) -> bool {
        matches!(self, Status::In | Status::Del)
    }
}

/// The mutable state of one local ring member, guarded by the owning
/// strategy's lock.
#[derive(Debug)]
pub struct LocalNode {
    /// Link to this node itself.
    pub me: Link,
    /// Membership status.
    pub status: Status,
    /// Left neighbor.
    pub pred: Option<Link>,
    /// Right neighbor.
    pub succ: Option<Link>,
    /// Sequence of the left edge (`pred -> self`). Only ever increases.
    pub lseq: LinkSeq,
    /// Sequence of the right edge (`self -> succ`). Only ever increases.
    pub rseq: LinkSeq,
    /// Further left neighbors for failure recovery.
    pub nbrs: NeighborSet,
}

impl LocalNode {
    /// A fresh node in status `Out`.
    pub fn new(me: Link, neighbor_capacity: usize) -> Self {
        let nbrs = NeighborSet::new(me.clone(), neighbor_capacity);
        Self {
            me,
            status: Status::Out,
            pred: None,
            succ: None,
            lseq: LinkSeq::ZERO,
            rseq: LinkSeq::ZERO,
            nbrs,
        }
    }

    /// Advance `lseq` to `to` if that is an increase; never moves backwards.
    pub fn advance_lseq(&mut self, to: LinkSeq) {
        if to > self.lseq {
            self.lseq = to;
        }
    }

    /// Advance `rseq` to `to` if that is an increase; never moves backwards.
    pub fn advance_rseq(&mut self, to: LinkSeq) {
        if to > self.rseq {
            self.rseq = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::key::UniqId;

    #[test]
    fn test_status_is_inserted() {
        assert!(!Status::Out.is_inserted());
        assert!(!Status::Ins.is_inserted());
        assert!(Status::Del.is_inserted());
        assert!(Status::In.is_inserted());
    }

    #[test]
    fn test_seq_never_moves_backwards() {
        let id = UniqId::from_u64(1);
        let me = Link::new(id, DdllKey::new(0, id, "l", 0));
        let mut node = LocalNode::new(me, 4);

        node.advance_rseq(LinkSeq::new(1, 3));
        assert_eq!(node.rseq, LinkSeq::new(1, 3));
        node.advance_rseq(LinkSeq::new(0, 9));
        assert_eq!(node.rseq, LinkSeq::new(1, 3));
        node.advance_lseq(LinkSeq::new(0, 1));
        node.advance_lseq(LinkSeq::ZERO);
        assert_eq!(node.lseq, LinkSeq::new(0, 1));
    }
}
