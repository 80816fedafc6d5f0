//! ddll-core: a self-repairing distributed doubly-linked list.
//! --------------
//! - [DdllStrategy](crate::ring::DdllStrategy) is the per-key ring state
//!   machine: join, leave and link repair via `SetR`/`SetL` exchanges.
//! - [NeighborSet](crate::ring::NeighborSet) keeps a bounded set of further
//!   left neighbors so a node can relink around multi-node failures.
//! - [MessagingFramework](crate::message::MessagingFramework) is the
//!   request/ack/reply ledger: message ids, ack timers, retransmission and
//!   exactly-once response delivery on top of one-way sends.
//! - [RingManager](crate::manager::RingManager) binds one or more keyed
//!   virtual nodes to a physical peer and exposes the RPC surface other
//!   peers consume.
//!
//! # Ring maintenance
//!
//! All members of one list form a ring ordered by [DdllKey](crate::ring::DdllKey).
//! An edge `l -> r` is only ever modified by asking `l` (the left endpoint) to
//! repoint its right pointer with a `SetR` request. `l` accepts iff its
//! current right pointer matches the request, which makes every edge update
//! appear atomic from the perspective of one peer; otherwise it answers
//! `SetRNak` with a hint so the requester can retry without a full re-search.
//! The right-hand side learns about accepted changes through one-way `SetL`
//! pushes guarded by monotonically increasing [LinkSeq](crate::ring::LinkSeq)
//! values: stale or reordered messages compare lower and are dropped.
//!
//! # Failure repair
//!
//! A periodic prober checks each node's left neighbor. When it is suspected
//! dead (timeouts recorded in [StatManager](crate::stats::StatManager)) the
//! node walks its neighbor set, skipping endpoints flagged possibly failed,
//! to find the closest live left node, then relinks with the same `SetR`
//! exchange after bumping its repair generation, which invalidates any
//! in-flight pre-repair traffic.

pub mod config;
pub mod consts;
pub mod error;
pub mod manager;
pub mod message;
pub mod ring;
pub mod stats;
#[cfg(test)]
mod tests;
