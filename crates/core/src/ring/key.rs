#![warn(missing_docs)]

//! Key and identity types of the ring.
//!
//! Members of one list are totally ordered by [DdllKey] and then bent into a
//! circle: the largest key wraps around to the smallest. Because keys are
//! opaque comparables rather than numbers, there is no distance arithmetic on
//! this ring. Order relative to a reference point is established by rotation
//! instead: [ring_cmp_from] compares two keys by their clockwise position as
//! seen from a base key, and [in_ring_range] tests interval membership with
//! wraparound. Every "closeness" decision in the protocol goes through these
//! two functions so that it is well-defined modulo wraparound.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// The application-supplied part of a key: an opaque comparable value.
/// Integers order before strings; within a variant the natural order applies.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RawKey {
    /// An integer key.
    Int(i64),
    /// A string key.
    Str(String),
}

impl From<i64> for RawKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for RawKey {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{:?}", v),
        }
    }
}

/// A globally unique, comparable peer identity.
///
/// Produced by the identity provider (here: random UUIDs). It is also used as
/// the transport endpoint address of the peer, so a [Link](super::Link) needs
/// nothing beyond a `UniqId` and a key to be addressable.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniqId(Uuid);

/// Peers are addressed by their identity.
pub type PeerId = UniqId;

impl UniqId {
    /// A fresh, globally unique identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic identity for tests and examples.
    pub fn from_u64(n: u64) -> Self {
        Self(Uuid::from_u128(n as u128))
    }
}

impl fmt::Display for UniqId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UniqId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The first uuid group is enough to tell peers apart in logs.
        let s = self.0.to_string();
        write!(f, "UniqId({})", &s[..8])
    }
}

/// A ring membership key.
///
/// The total order is `(raw, owner, nonce, list_id)`. The `nonce` exists so
/// the same raw value can be (re)inserted multiple times with distinct
/// identity: two keys equal up to the nonce are distinct ring members.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DdllKey {
    /// The ordering value.
    pub raw: RawKey,
    /// Identity of the peer that inserted the key.
    pub owner: UniqId,
    /// Name of the list this key participates in.
    pub list_id: String,
    /// Distinguishes repeated insertions of the same raw value.
    pub nonce: u32,
}

impl DdllKey {
    /// Create a new key.
    pub fn new(raw: impl Into<RawKey>, owner: UniqId, list_id: &str, nonce: u32) -> Self {
        Self {
            raw: raw.into(),
            owner,
            list_id: list_id.to_string(),
            nonce,
        }
    }

    /// Relaxed equality ignoring `list_id`: do the two keys denote the same
    /// inserted entity?
    pub fn same_entity(&self, other: &Self) -> bool {
        self.raw == other.raw && self.owner == other.owner && self.nonce == other.nonce
    }
}

impl PartialOrd for DdllKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DdllKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw
            .cmp(&other.raw)
            .then_with(|| self.owner.cmp(&other.owner))
            .then_with(|| self.nonce.cmp(&other.nonce))
            .then_with(|| self.list_id.cmp(&other.list_id))
    }
}

impl fmt::Display for DdllKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.raw, self.nonce)
    }
}

/// Compare `a` and `b` by clockwise position as seen from `base`.
///
/// Walking clockwise from `base`, the first key encountered is the smallest
/// key greater than `base`; after the largest key the walk wraps to the
/// smallest. `base` itself ranks last (a full circle away).
pub fn ring_cmp_from(base: &DdllKey, a: &DdllKey, b: &DdllKey) -> Ordering {
    (a <= base, a).cmp(&(b <= base, b))
}

/// Test `x ∈ (a, b)` on the ring: walking clockwise from `a`, is `x` met
/// strictly before `b`? When `a == b` the interval is the full circle and
/// every key except `a` itself is inside.
pub fn in_ring_range(x: &DdllKey, a: &DdllKey, b: &DdllKey) -> bool {
    match a.cmp(b) {
        Ordering::Less => a < x && x < b,
        Ordering::Greater => x > a || x < b,
        Ordering::Equal => x != a,
    }
}

/// Ordering with a key reference.
/// This trait defines the necessary method for sorting based on ring position.
pub trait RingSort {
    /// Sort clockwise as seen from `base`.
    fn sort_clockwise_from(&mut self, base: &DdllKey);
}

impl RingSort for Vec<DdllKey> {
    fn sort_clockwise_from(&mut self, base: &DdllKey) {
        self.sort_by(|a, b| ring_cmp_from(base, a, b));
    }
}
