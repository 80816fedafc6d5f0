#![warn(missing_docs)]
//! The peer-level coordination layer.
//!
//! A [RingManager] binds one or more keyed virtual nodes ([RingVNode]) to a
//! physical peer. It listens on the transport, decodes envelopes, routes
//! requests to the protocol handlers and responses to the owning framework,
//! and drives key insertion/removal: `add_key` locates the insertion point
//! with iterative `GetClosestLinks` queries against an introducer, then runs
//! the DDLL join; `remove_key` runs the leave.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::Weak;

use async_trait::async_trait;
use bytes::Bytes;
use ddll_transport::core::callback::CallbackError;
use ddll_transport::core::callback::TransportCallback;
use ddll_transport::core::transport::TransportInterface;

use crate::config::DdllConfig;
use crate::consts::CLOSEST_SEARCH_MAX_HOPS;
use crate::error::Error;
use crate::error::Result;
use crate::message::AckMessage;
use crate::message::Envelope;
use crate::message::Message;
use crate::message::MessageHandler;
use crate::message::MessagingFramework;
use crate::message::ReplyMessage;
use crate::message::RequestMessage;
use crate::message::ResponseEvent;
use crate::message::TransOptions;
use crate::message::types::GetClosestLinks;
use crate::ring::ring_cmp_from;
use crate::ring::DdllKey;
use crate::ring::DdllStrategy;
use crate::ring::Link;
use crate::ring::PeerId;
use crate::ring::RawKey;
use crate::stats::StatManager;

mod vnode;

pub use vnode::RingVNode;
pub use vnode::VNodeMode;

/// Reserved list id of the peer-level endpoint, distinguishing it from any
/// ring member hosted on the peer.
pub const PEER_LIST_ID: &str = "#peer";

/// The per-peer coordinator.
pub struct RingManager {
    peer_id: PeerId,
    peer_link: Link,
    list_id: String,
    config: DdllConfig,
    transport: Arc<dyn TransportInterface>,
    stats: Arc<StatManager>,
    /// Peer-level framework serving routing-table queries.
    msgr: Arc<MessagingFramework>,
    /// The routing-table lock: readers during RPC-served queries, writer
    /// during vnode creation and removal.
    vnodes: RwLock<HashMap<RawKey, Arc<RingVNode>>>,
    nonce: AtomicU32,
}

struct ManagerCallback {
    manager: Weak<RingManager>,
}

#[async_trait]
impl TransportCallback for ManagerCallback {
    async fn on_message(&self, _from: &str, bytes: &Bytes) -> std::result::Result<(), CallbackError> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };
        let envelope = Envelope::from_bincode(bytes).map_err(|e| Box::new(e) as CallbackError)?;
        manager.dispatch(envelope).await;
        Ok(())
    }
}

impl RingManager {
    /// Create a manager for `peer_id`, listening on the transport.
    pub async fn new(
        peer_id: PeerId,
        transport: Arc<dyn TransportInterface>,
        config: DdllConfig,
        list_id: &str,
    ) -> Result<Arc<Self>> {
        let stats = Arc::new(StatManager::new(config.failure_strikes));
        let peer_link = Self::peer_link_of(peer_id);
        let msgr = MessagingFramework::new(
            peer_link.clone(),
            transport.clone(),
            stats.clone(),
            config.clone(),
        );
        let manager = Arc::new(Self {
            peer_id,
            peer_link,
            list_id: list_id.to_string(),
            config,
            transport: transport.clone(),
            stats,
            msgr,
            vnodes: RwLock::new(HashMap::new()),
            nonce: AtomicU32::new(0),
        });
        transport
            .listen(
                &peer_id.to_string(),
                Arc::new(ManagerCallback {
                    manager: Arc::downgrade(&manager),
                }),
            )
            .await?;
        Ok(manager)
    }

    /// This peer's identity.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The peer-level endpoint link of `peer`. Deterministic, so any peer
    /// can address any other without prior contact.
    pub fn peer_link_of(peer: PeerId) -> Link {
        let key = DdllKey::new(peer.to_string().as_str(), peer, PEER_LIST_ID, 0);
        Link::new(peer, key)
    }

    /// The peer-level endpoint link of this peer.
    pub fn peer_link(&self) -> &Link {
        &self.peer_link
    }

    /// Per-endpoint communication statistics of this peer.
    pub fn stats(&self) -> &Arc<StatManager> {
        &self.stats
    }

    /// The vnode registered for `raw`, if any.
    pub fn vnode(&self, raw: &RawKey) -> Option<Arc<RingVNode>> {
        let vnodes = self.vnodes.read().ok()?;
        vnodes.get(raw).cloned()
    }

    pub(crate) fn vnode_by_key(&self, key: &DdllKey) -> Option<Arc<RingVNode>> {
        let vnodes = self.vnodes.read().ok()?;
        vnodes.values().find(|v| v.key.same_entity(key)).cloned()
    }

    pub(crate) fn framework_for(&self, receiver: &Link) -> Arc<MessagingFramework> {
        if receiver.key.list_id == PEER_LIST_ID {
            return self.msgr.clone();
        }
        self.vnode_by_key(&receiver.key)
            .map(|v| v.framework().clone())
            .unwrap_or_else(|| self.msgr.clone())
    }

    // ------------------------------------------------------------------
    // The RPC surface consumed by remote peers.
    // ------------------------------------------------------------------

    /// Links of all inserted local members.
    pub fn get_local_links(&self) -> Result<Vec<Link>> {
        let vnodes = self.vnodes.read().map_err(|_| Error::StateLock)?;
        Ok(vnodes
            .values()
            .filter(|v| v.strategy.status().is_inserted())
            .map(|v| v.strategy.me().clone())
            .collect())
    }

    /// The closest `(left, right)` neighbors of `key` in this peer's local
    /// routing table. Fails with [Error::Unavailable] when the peer holds no
    /// inserted keys.
    pub fn get_closest_links(&self, key: &DdllKey) -> Result<(Link, Link)> {
        let local: Vec<Arc<RingVNode>> = {
            let vnodes = self.vnodes.read().map_err(|_| Error::StateLock)?;
            vnodes
                .values()
                .filter(|v| v.strategy.status().is_inserted())
                .cloned()
                .collect()
        };
        if local.is_empty() {
            return Err(Error::Unavailable);
        }

        // World view of this peer: its own members plus every link they know.
        let mut links: Vec<Link> = vec![];
        let mut push = |link: Link, links: &mut Vec<Link>| {
            if link.key != *key && !links.iter().any(|l| l.key == link.key) {
                links.push(link);
            }
        };
        for v in &local {
            push(v.strategy.me().clone(), &mut links);
            if let Some(pred) = v.strategy.pred() {
                push(pred, &mut links);
            }
            if let Some(succ) = v.strategy.succ() {
                push(succ, &mut links);
            }
            for nbr in v.strategy.neighbors() {
                push(nbr, &mut links);
            }
        }

        links.sort_by(|a, b| ring_cmp_from(key, &a.key, &b.key));
        let (Some(right), Some(left)) = (links.first().cloned(), links.last().cloned()) else {
            return Err(Error::Unavailable);
        };

        // When the left link is a local member we know its edge exactly.
        let right = local
            .iter()
            .find(|v| v.strategy.me().key == left.key)
            .and_then(|v| v.strategy.succ())
            .unwrap_or(right);
        Ok((left, right))
    }

    /// One-way delivery entry point for requests.
    pub async fn request_msg_received(self: &Arc<Self>, req: RequestMessage) {
        let framework = self.framework_for(&req.receiver);
        if req.opts.expects_response() && !framework.register_incoming(&req) {
            // A retransmitted request we already executed: re-ack only.
            if let Err(e) = framework.ack_request(&req).await {
                tracing::debug!("re-ack of duplicate request failed: {}", e);
            }
            return;
        }
        let handler = MessageHandler::new(self.clone());
        if let Err(e) = handler.handle_request(&req).await {
            tracing::warn!("request {} from {} failed: {}", req.body, req.sender, e);
        }
    }

    /// One-way delivery entry point for replies.
    pub async fn reply_msg_received(self: &Arc<Self>, reply: ReplyMessage) {
        if reply.receiver.addr != self.peer_id {
            // A Direct reply passing through on its way to the root.
            let dst = reply.receiver.addr;
            if let Err(e) = self.msgr.forward_envelope(dst, &Envelope::Reply(reply)).await {
                tracing::debug!("failed to forward reply toward its root: {}", e);
            }
            return;
        }
        let receiver = reply.receiver.clone();
        self.framework_for(&receiver).reply_received(reply);
    }

    /// One-way delivery entry point for acks.
    pub async fn ack_received(self: &Arc<Self>, ack: AckMessage) {
        if ack.receiver.addr != self.peer_id {
            tracing::debug!("misrouted ack for {}", ack.receiver);
            return;
        }
        self.framework_for(&ack.receiver).ack_received(&ack);
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        match envelope {
            Envelope::Request(req) => self.request_msg_received(req).await,
            Envelope::Reply(reply) => self.reply_msg_received(reply).await,
            Envelope::Ack(ack) => self.ack_received(ack).await,
        }
    }

    // ------------------------------------------------------------------
    // Key insertion and removal.
    // ------------------------------------------------------------------

    /// Insert `raw` into the ring, locating the insertion point through
    /// `introducer` (`None` seeds a fresh singleton ring).
    ///
    /// Returns `Ok(false)` without any network traffic when the key is
    /// already registered on this manager, and after the retry budget is
    /// spent.
    pub async fn add_key(
        self: &Arc<Self>,
        introducer: Option<PeerId>,
        raw: impl Into<RawKey>,
    ) -> Result<bool> {
        let raw = raw.into();
        let vnode = {
            let mut vnodes = self.vnodes.write().map_err(|_| Error::StateLock)?;
            if vnodes.contains_key(&raw) {
                tracing::debug!("key {} is already registered on this peer", raw);
                return Ok(false);
            }
            let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
            let key = DdllKey::new(raw.clone(), self.peer_id, &self.list_id, nonce);
            let me = Link::new(self.peer_id, key.clone());
            let framework = MessagingFramework::new(
                me.clone(),
                self.transport.clone(),
                self.stats.clone(),
                self.config.clone(),
            );
            let strategy = DdllStrategy::new(
                me,
                framework.clone(),
                self.stats.clone(),
                self.config.clone(),
            );
            let vnode = RingVNode::new(raw.clone(), key, framework, strategy);
            vnodes.insert(raw.clone(), vnode.clone());
            vnode
        };

        vnode.set_mode(VNodeMode::Inserting);
        let Some(introducer) = introducer else {
            vnode.strategy.insert_as_initial()?;
            vnode.set_mode(VNodeMode::Inserted);
            tracing::info!("{} seeded a fresh ring with {}", self.peer_id, vnode.key);
            return Ok(true);
        };

        for _ in 0..self.config.retry_count {
            let (left, right) = match self.locate_insertion_point(introducer, &vnode.key).await {
                Ok(pair) => pair,
                Err(Error::Unavailable) => {
                    self.discard_vnode(&raw);
                    return Err(Error::Unavailable);
                }
                Err(e) => {
                    tracing::warn!("insertion point search for {} failed: {}", vnode.key, e);
                    continue;
                }
            };
            match vnode.strategy.join(left, right).await {
                Ok(true) => {
                    vnode.set_mode(VNodeMode::Inserted);
                    return Ok(true);
                }
                // Stale neighbors; search again.
                Ok(false) => continue,
                Err(e) => {
                    self.discard_vnode(&raw);
                    return Err(e);
                }
            }
        }
        self.discard_vnode(&raw);
        Ok(false)
    }

    /// Remove `raw` from the ring. Returns `Ok(false)` when the key is not
    /// registered here or the leave retry budget was spent (the key then
    /// remains inserted).
    pub async fn remove_key(self: &Arc<Self>, raw: &RawKey) -> Result<bool> {
        let vnode = {
            let vnodes = self.vnodes.read().map_err(|_| Error::StateLock)?;
            match vnodes.get(raw) {
                Some(vnode) => vnode.clone(),
                None => return Ok(false),
            }
        };
        vnode.set_mode(VNodeMode::Deleting);
        match vnode.strategy.leave().await {
            Ok(true) => {
                vnode.set_mode(VNodeMode::Deleted);
                self.discard_vnode(raw);
                Ok(true)
            }
            Ok(false) => {
                vnode.set_mode(VNodeMode::Inserted);
                Ok(false)
            }
            Err(e) => {
                vnode.set_mode(VNodeMode::Inserted);
                Err(e)
            }
        }
    }

    fn discard_vnode(&self, raw: &RawKey) {
        if let Ok(mut vnodes) = self.vnodes.write() {
            vnodes.remove(raw);
        }
    }

    /// Chase `GetClosestLinks` answers from peer to peer until the answering
    /// peer owns the left link, i.e. the returned pair is an authoritative
    /// edge.
    async fn locate_insertion_point(
        &self,
        introducer: PeerId,
        key: &DdllKey,
    ) -> Result<(Link, Link)> {
        let mut target = introducer;
        for _ in 0..CLOSEST_SEARCH_MAX_HOPS {
            let dst = Self::peer_link_of(target);
            let query = Message::GetClosestLinks(GetClosestLinks { key: key.clone() });
            let waiter = self
                .msgr
                .request(&dst, query, TransOptions::direct())
                .await?;
            let msg_id = waiter.msg_id;
            match waiter.wait().await? {
                ResponseEvent::Reply(Message::GetClosestLinksReply(reply)) => {
                    let Some((left, right)) = reply.links else {
                        return Err(Error::Unavailable);
                    };
                    if left.addr == target {
                        return Ok((left, right));
                    }
                    target = left.addr;
                }
                ResponseEvent::Timeout => return Err(Error::ResponseTimeout(msg_id)),
                ResponseEvent::Reply(other) => {
                    tracing::error!("unexpected reply {} to GetClosestLinks", other);
                }
            }
        }
        Err(Error::SearchHopsExceeded(CLOSEST_SEARCH_MAX_HOPS))
    }
}
