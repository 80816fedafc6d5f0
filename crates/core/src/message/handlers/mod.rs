#![warn(missing_docs)]
//! This module implements the protocol request handlers.
//!
//! Each message type gets its own [HandleMsg] impl on [MessageHandler]; the
//! dispatcher routes a received [RequestMessage] to the matching impl and
//! afterwards acks it, unless the handler already sent a reply (which doubles
//! as the ack) or the request expects no response at all.

use std::sync::Arc;

use async_trait::async_trait;

use super::payload::RequestMessage;
use super::payload::ResponseType;
use super::types::Message;
use crate::error::Result;
use crate::manager::RingManager;

/// Operator and handler for ring edge maintenance.
pub mod ddll;
/// Operator and handler for routing-table queries and liveness.
pub mod lookup;

/// Generic trait for handling one message type, inspired by the actor model.
#[async_trait]
pub trait HandleMsg<T> {
    /// Message handler.
    async fn handle(&self, ctx: &RequestMessage, msg: &T) -> Result<()>;
}

/// Dispatches received requests to the protocol handlers of one peer.
#[derive(Clone)]
pub struct MessageHandler {
    manager: Arc<RingManager>,
}

/// Whether handling this body always sends a reply, making a separate ack
/// redundant.
fn replies_inline(body: &Message) -> bool {
    matches!(
        body,
        Message::SetR(_)
            | Message::GetCandidates(_)
            | Message::GetClosestLinks(_)
            | Message::GetLocalLinks(_)
            | Message::Ping(_)
    )
}

impl MessageHandler {
    /// Create a handler bound to `manager`.
    pub fn new(manager: Arc<RingManager>) -> Self {
        Self { manager }
    }

    fn manager(&self) -> &Arc<RingManager> {
        &self.manager
    }

    /// Handle one received request and take care of its ack.
    pub async fn handle_request(&self, req: &RequestMessage) -> Result<()> {
        let handled = match &req.body {
            Message::SetR(msg) => self.handle(req, msg).await,
            Message::SetL(msg) => self.handle(req, msg).await,
            Message::PropagateNeighbors(msg) => self.handle(req, msg).await,
            Message::GetCandidates(msg) => self.handle(req, msg).await,
            Message::GetClosestLinks(msg) => self.handle(req, msg).await,
            Message::GetLocalLinks(msg) => self.handle(req, msg).await,
            Message::Ping(msg) => self.handle(req, msg).await,
            other => {
                tracing::warn!("request from {} carries non-request body {}", req.sender, other);
                Ok(())
            }
        };

        // A reply only doubles as the ack when it actually travelled to the
        // hop that sent us the request; a Direct reply to a remote root does
        // not, so the hop still gets its own ack.
        let replied = handled.is_ok() && replies_inline(&req.body);
        let reply_acked_sender = replied
            && (req.opts.response_type == ResponseType::Aggregate
                || req.reply_to.addr == req.sender.addr);
        if req.opts.expects_response() && !reply_acked_sender {
            self.manager
                .framework_for(&req.receiver)
                .ack_request(req)
                .await?;
        }
        handled
    }
}
