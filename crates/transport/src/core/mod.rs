//! The main concepts of this mod are:
//!
//! The [TransportInterface](transport::TransportInterface) trait defines how to
//! register listening endpoints and deliver one-way messages to remote
//! endpoints. See the [transport] module.
//!
//! The [TransportCallback](callback::TransportCallback) trait is used to let
//! the upper layer handle the bytes arriving at a listening endpoint. See the
//! [callback] module.

pub mod callback;
pub mod transport;
