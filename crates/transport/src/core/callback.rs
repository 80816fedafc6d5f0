//! Callback interface through which received bytes re-enter the upper layer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Any error produced by a callback is reported as a string. The transport
/// logs it and drops the message, mirroring an unreliable network.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// The callback registered for a listening endpoint.
#[async_trait]
pub trait TransportCallback: Send + Sync {
    /// Invoked for every message delivered to the endpoint.
    /// `from` is the sending endpoint as declared by the sender; the transport
    /// performs no authentication (wire security is out of scope).
    async fn on_message(&self, from: &str, bytes: &Bytes) -> Result<(), CallbackError>;
}

/// Shared reference type for [TransportCallback].
pub type SharedTransportCallback = Arc<dyn TransportCallback>;
