//! Bounded left-neighbor sets.

use serde::Deserialize;
use serde::Serialize;

use super::key::ring_cmp_from;
use super::key::DdllKey;
use super::node::Link;

/// A bounded, ordered collection of left-side neighbors.
///
/// It is necessary to know more than the immediate left neighbor to survive
/// multi-node failures: when the left neighbor dies, repair walks this set to
/// find the closest left node that is still alive. Members are kept in order
/// of counter-clockwise closeness to the owner (index 0 is the immediate left
/// candidate); when the capacity is exceeded the furthest member is evicted
/// first.
///
/// The set is mutated only under the owning node's lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeighborSet {
    owner: Link,
    capacity: usize,
    nbrs: Vec<Link>,
}

impl NeighborSet {
    /// An empty set owned by `owner`.
    pub fn new(owner: Link, capacity: usize) -> Self {
        Self {
            owner,
            capacity,
            nbrs: vec![],
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.nbrs.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.nbrs.is_empty()
    }

    /// Whether a member with this key is present.
    pub fn contains(&self, key: &DdllKey) -> bool {
        self.nbrs.iter().any(|l| l.key == *key)
    }

    /// Insert a neighbor. The owner itself is never stored. Returns `true`
    /// if the set changed.
    pub fn add(&mut self, link: Link) -> bool {
        if link.key == self.owner.key || self.contains(&link.key) {
            return false;
        }
        self.nbrs.push(link);
        self.arrange();
        // The new member may have been the one evicted right away.
        true
    }

    /// Remove the member with this key. Returns `true` if it was present.
    pub fn remove(&mut self, key: &DdllKey) -> bool {
        let before = self.nbrs.len();
        self.nbrs.retain(|l| l.key != *key);
        before != self.nbrs.len()
    }

    /// Merge a batch of links received from a neighbor. Returns `true` if the
    /// set changed.
    pub fn merge(&mut self, links: &[Link]) -> bool {
        let mut changed = false;
        for link in links {
            if link.key == self.owner.key || self.contains(&link.key) {
                continue;
            }
            self.nbrs.push(link.clone());
            changed = true;
        }
        if changed {
            self.arrange();
        }
        changed
    }

    /// Repair candidates, closest left first.
    pub fn candidates(&self) -> Vec<Link> {
        self.nbrs.clone()
    }

    /// The subset owed to a right-hand node at `right`: this node itself plus
    /// the members closest to the left of `right`, truncated to capacity.
    /// Since the owner is `right`'s immediate left, it comes first.
    pub fn set_for_right(&self, right: &DdllKey) -> Vec<Link> {
        let mut set = vec![self.owner.clone()];
        set.extend(self.nbrs.iter().cloned());
        set.retain(|l| l.key != *right);
        sort_left_closeness(&mut set, right);
        set.truncate(self.capacity);
        set
    }

    fn arrange(&mut self) {
        sort_left_closeness(&mut self.nbrs, &self.owner.key);
        self.nbrs.truncate(self.capacity);
    }
}

/// Sort by counter-clockwise closeness to `base`: the immediate left of
/// `base` first. That is exactly the reverse of the clockwise order.
fn sort_left_closeness(links: &mut [Link], base: &DdllKey) {
    links.sort_by(|a, b| ring_cmp_from(base, &b.key, &a.key));
}
