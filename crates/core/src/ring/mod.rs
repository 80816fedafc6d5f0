//! The ring data model and the DDLL node state machine.
//!
//! All members of one list form a circle ordered by [DdllKey]. Each local
//! member is driven by a [DdllStrategy], which owns the node state
//! ([LocalNode]) and performs joins, leaves and link repairs through
//! `SetR`/`SetL` message exchanges.

pub mod key;
pub mod neighbors;
pub mod node;
pub mod seq;
pub mod strategy;

pub use key::in_ring_range;
pub use key::ring_cmp_from;
pub use key::DdllKey;
pub use key::PeerId;
pub use key::RawKey;
pub use key::RingSort;
pub use key::UniqId;
pub use neighbors::NeighborSet;
pub use node::Link;
pub use node::LocalNode;
pub use node::Status;
pub use seq::LinkSeq;
pub use strategy::DdllStrategy;
pub use strategy::SetRDisposition;
