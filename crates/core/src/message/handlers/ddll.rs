//! Handlers for the ring edge maintenance messages.

use async_trait::async_trait;

use super::HandleMsg;
use super::MessageHandler;
use crate::error::Result;
use crate::message::payload::RequestMessage;
use crate::message::types::GetCandidates;
use crate::message::types::Message;
use crate::message::types::PropagateNeighbors;
use crate::message::types::SetL;
use crate::message::types::SetR;
use crate::message::types::SetRNak;
use crate::ring::SetRDisposition;

#[async_trait]
impl HandleMsg<SetR> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, msg: &SetR) -> Result<()> {
        let Some(vnode) = self.manager().vnode_by_key(&ctx.receiver.key) else {
            // The addressed member is not (or no longer) hosted here.
            tracing::debug!("SetR for unknown member {}", ctx.receiver);
            return self
                .manager()
                .framework_for(&ctx.receiver)
                .reply_to(ctx, Message::SetRNak(SetRNak { hint: None }))
                .await;
        };

        match vnode.strategy.handle_setr(msg)? {
            SetRDisposition::Ack { ack, setl } => {
                if let Some((dst, setl)) = setl {
                    vnode
                        .framework()
                        .send_oneway(&dst, Message::SetL(setl))
                        .await?;
                }
                vnode
                    .framework()
                    .reply_to(ctx, Message::SetRAck(ack))
                    .await
            }
            SetRDisposition::Nak(nak) => {
                vnode
                    .framework()
                    .reply_to(ctx, Message::SetRNak(nak))
                    .await
            }
        }
    }
}

#[async_trait]
impl HandleMsg<SetL> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, msg: &SetL) -> Result<()> {
        let Some(vnode) = self.manager().vnode_by_key(&ctx.receiver.key) else {
            tracing::debug!("SetL for unknown member {}", ctx.receiver);
            return Ok(());
        };
        if let Some((dst, wave)) = vnode.strategy.handle_setl(msg)? {
            vnode
                .framework()
                .send_oneway(&dst, Message::PropagateNeighbors(wave))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HandleMsg<PropagateNeighbors> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, msg: &PropagateNeighbors) -> Result<()> {
        let Some(vnode) = self.manager().vnode_by_key(&ctx.receiver.key) else {
            tracing::debug!("PropagateNeighbors for unknown member {}", ctx.receiver);
            return Ok(());
        };
        if let Some((dst, wave)) = vnode.strategy.handle_propagate(msg)? {
            vnode
                .framework()
                .send_oneway(&dst, Message::PropagateNeighbors(wave))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HandleMsg<GetCandidates> for MessageHandler {
    async fn handle(&self, ctx: &RequestMessage, msg: &GetCandidates) -> Result<()> {
        let Some(vnode) = self.manager().vnode_by_key(&ctx.receiver.key) else {
            tracing::debug!("GetCandidates for unknown member {}", ctx.receiver);
            return self
                .manager()
                .framework_for(&ctx.receiver)
                .reply_to(
                    ctx,
                    Message::GetCandidatesReply(crate::message::types::GetCandidatesReply {
                        candidates: vec![],
                        succ: None,
                    }),
                )
                .await;
        };
        let reply = vnode.strategy.handle_get_candidates(msg)?;
        vnode
            .framework()
            .reply_to(ctx, Message::GetCandidatesReply(reply))
            .await
    }
}
