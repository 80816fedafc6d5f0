//! Handlers for routing-table queries and liveness probes.

use async_trait::async_trait;

use super::HandleMsg;
use super::MessageHandler;
use crate::error::Error;
use crate::error::Result;
use crate::message::payload::RequestMessage;
use crate::message::types::GetClosestLinks;
use crate::message::types::GetClosestLinksReply;
use crate::message::types::GetLocalLinks;
use crate::message::types::GetLocalLinksReply;
use crate::message::types::Message;
use crate::message::types::Ping;
use crate::message::types::Pong;

#[async_trait]
impl HandleMsg<GetClosestLinks> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, msg: &GetClosestLinks) -> Result<()> {
        let links = match self.manager().get_closest_links(&msg.key) {
            Ok(links) => Some(links),
            // Holding no keys is surfaced to the caller, not retried here.
            Err(Error::Unavailable) => None,
            Err(e) => return Err(e),
        };
        self.manager()
            .framework_for(&ctx.receiver)
            .reply_to(ctx, Message::GetClosestLinksReply(GetClosestLinksReply { links }))
            .await
    }
}

#[async_trait]
impl HandleMsg<GetLocalLinks> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, _msg: &GetLocalLinks) -> Result<()> {
        let links = self.manager().get_local_links()?;
        self.manager()
            .framework_for(&ctx.receiver)
            .reply_to(ctx, Message::GetLocalLinksReply(GetLocalLinksReply { links }))
            .await
    }
}

#[async_trait]
impl HandleMsg<Ping> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, _msg: &Ping) -> Result<()> {
        self.manager()
            .framework_for(&ctx.receiver)
            .reply_to(ctx, Message::Pong(Pong))
            .await
    }
}
