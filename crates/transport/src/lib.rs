#![warn(missing_docs)]
//! Transport layer abstraction for the ddll ring.
//!
//! The main concepts of this crate are:
//!
//! The [TransportInterface](core::transport::TransportInterface) trait defines
//! how to deliver opaque one-way messages to a named endpoint. The ring core
//! never sees addresses beyond an endpoint string, so transports are swappable.
//!
//! The [TransportCallback](core::callback::TransportCallback) trait is used to
//! let the upper layer handle bytes arriving at an endpoint. A callback is
//! registered when an endpoint starts listening.
//!
//! The [ChannelTransport](connections::ChannelTransport) is a process-local
//! implementation used by tests and simulations. It supports fault injection
//! (blocked endpoints, random message loss, random delivery delay) so that the
//! ring repair paths can be exercised without a real network.

pub mod connections;
pub mod core;
pub mod error;
