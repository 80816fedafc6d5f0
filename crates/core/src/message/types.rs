#![warn(missing_docs)]
//! This module defines the protocol message bodies of the ring.
//! Edge updates follow a request/response pattern (`SetR` answered by
//! `SetRAck` or `SetRNak`); pointer pushes and neighbor propagation are
//! one-way.

use serde::Deserialize;
use serde::Serialize;

use crate::ring::DdllKey;
use crate::ring::Link;
use crate::ring::LinkSeq;

/// Flavor of a `SetR` edge update.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetRType {
    /// Ordinary insertion or deletion of a live node.
    Normal,
    /// Repair where the receiver's current right neighbor is presumed dead:
    /// only the left side of the requester changes, no `SetL` is pushed.
    LeftOnly,
    /// Repair where the requester re-inserts itself between the receiver and
    /// the receiver's live successor, taking over both of its own edges.
    Both,
}

/// Ask the receiver (the left endpoint of an edge) to repoint its right
/// pointer from `r_cur` to `r_new`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetR {
    /// The new right neighbor.
    pub r_new: Link,
    /// What the requester believes the receiver's current right neighbor is.
    /// A mismatch is answered with [SetRNak].
    pub r_cur: Link,
    /// Flavor of the update.
    pub kind: SetRType,
    /// The requester's sequence proposal; the receiver derives all new edge
    /// sequences from `max` of this and its own counter, keeping every
    /// counter monotone on both sides.
    pub seq: LinkSeq,
}

/// Positive answer to [SetR]: the edge was updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetRAck {
    /// Sequence for the requester's left edge (receiver -> requester).
    pub seq: LinkSeq,
    /// Sequence for the requester's right edge, present when the update gave
    /// the requester a new right neighbor (insertion and `Both` repair).
    pub fwd_seq: Option<LinkSeq>,
    /// The neighbor subset owed to the requester.
    pub nbrs: Vec<Link>,
}

/// Negative answer to [SetR]: the receiver's state did not match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetRNak {
    /// A better `(pred, succ)` candidate pair, when the receiver can tell
    /// which side the mismatch lies on. Lets the requester retry without a
    /// full re-search.
    pub hint: Option<(Link, Link)>,
}

/// One-way push to the right-hand endpoint of an edge: your left neighbor is
/// now `l_new`. Only applied if `seq` is strictly newer than the receiver's
/// current left-edge sequence, which is what makes reordered or duplicated
/// pushes harmless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetL {
    /// The new left neighbor.
    pub l_new: Link,
    /// Sequence of the updated left edge.
    pub seq: LinkSeq,
    /// Neighbor subset for the receiver.
    pub nbrs: Vec<Link>,
}

/// One-way neighbor-set propagation travelling rightward along the ring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropagateNeighbors {
    /// Key of the node that started the wave; the wave never returns to it.
    pub src: DdllKey,
    /// The propagated neighbor subset.
    pub nbrs: Vec<Link>,
    /// A member that left or died and must be purged from neighbor sets.
    pub removed: Option<DdllKey>,
    /// Key the wave must not pass.
    pub limit: DdllKey,
}

/// Ask a node for its left-neighbor candidates and its current successor.
/// Used by the repair chain and by the liveness probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetCandidates {
    /// The asking node; candidates are ordered by closeness to it.
    pub origin: Link,
}

/// Answer to [GetCandidates].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetCandidatesReply {
    /// Left candidates for the origin, closest first.
    pub candidates: Vec<Link>,
    /// The answering node's successor; `None` when it is not inserted.
    pub succ: Option<Link>,
}

/// Ask a peer for the closest known links around `key` in its local routing
/// table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetClosestLinks {
    /// The key to locate.
    pub key: DdllKey,
}

/// Answer to [GetClosestLinks].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetClosestLinksReply {
    /// `(left, right)` neighbors of the key, or `None` when the answering
    /// peer holds no inserted keys.
    pub links: Option<(Link, Link)>,
}

/// Ask a peer for all links it hosts locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetLocalLinks;

/// Answer to [GetLocalLinks].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetLocalLinksReply {
    /// Links of all inserted local keys.
    pub links: Vec<Link>,
}

/// Liveness probe with no payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ping;

/// Answer to [Ping].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pong;

/// A collection of message bodies for unified management.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Message {
    /// Edge update request.
    SetR(SetR),
    /// Positive edge update response.
    SetRAck(SetRAck),
    /// Negative edge update response.
    SetRNak(SetRNak),
    /// Left pointer push.
    SetL(SetL),
    /// Rightward neighbor propagation.
    PropagateNeighbors(PropagateNeighbors),
    /// Candidate query.
    GetCandidates(GetCandidates),
    /// Candidate response.
    GetCandidatesReply(GetCandidatesReply),
    /// Closest-links query.
    GetClosestLinks(GetClosestLinks),
    /// Closest-links response.
    GetClosestLinksReply(GetClosestLinksReply),
    /// Local-links query.
    GetLocalLinks(GetLocalLinks),
    /// Local-links response.
    GetLocalLinksReply(GetLocalLinksReply),
    /// Liveness probe.
    Ping(Ping),
    /// Liveness response.
    Pong(Pong),
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Message::SetR(_) => "SetR",
            Message::SetRAck(_) => "SetRAck",
            Message::SetRNak(_) => "SetRNak",
            Message::SetL(_) => "SetL",
            Message::PropagateNeighbors(_) => "PropagateNeighbors",
            Message::GetCandidates(_) => "GetCandidates",
            Message::GetCandidatesReply(_) => "GetCandidatesReply",
            Message::GetClosestLinks(_) => "GetClosestLinks",
            Message::GetClosestLinksReply(_) => "GetClosestLinksReply",
            Message::GetLocalLinks(_) => "GetLocalLinks",
            Message::GetLocalLinksReply(_) => "GetLocalLinksReply",
            Message::Ping(_) => "Ping",
            Message::Pong(_) => "Pong",
        };
        write!(f, "{}", name)
    }
}
