//! Transport traits for one-way message delivery between endpoints.

use async_trait::async_trait;
use bytes::Bytes;

use super::callback::SharedTransportCallback;
use crate::error::Result;

/// A transport manages listening endpoints and delivers one-way messages
/// between them. Delivery is fire-and-forget: a successful return only means
/// the message was handed to the transport, not that the remote side has
/// processed (or will ever see) it. Reliability is the caller's concern.
#[async_trait]
pub trait TransportInterface: Send + Sync {
    /// Start listening on `endpoint`, invoking `callback` for every message
    /// delivered to it.
    async fn listen(&self, endpoint: &str, callback: SharedTransportCallback) -> Result<()>;

    /// Stop listening on `endpoint`. Messages in flight to it are dropped.
    async fn unlisten(&self, endpoint: &str) -> Result<()>;

    /// Send `bytes` from `src` to `dst`.
    ///
    /// Returns an error only for local conditions (unknown destination on a
    /// local transport, serialization upstream). A returned `Ok` still allows
    /// silent loss.
    async fn send_to(&self, src: &str, dst: &str, bytes: Bytes) -> Result<()>;
}
