#![warn(missing_docs)]

//! The per-node request/ack/reply ledger.
//!
//! [MessagingFramework] assigns message ids, keeps every request that awaits
//! a response in its `msg_store`, arms ack-timeout timers, matches incoming
//! acks and replies to pending requests, and retransmits according to the
//! request's [RetransMode]. Every registered request reaches exactly one
//! terminal outcome: a reply, an explicit timeout, or explicit disposal.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use ddll_transport::core::transport::TransportInterface;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::payload::AckMessage;
use super::payload::Envelope;
use super::payload::ReplyMessage;
use super::payload::RequestMessage;
use super::payload::RetransMode;
use super::payload::TransOptions;
use super::types::Message;
use crate::config::DdllConfig;
use crate::consts::SEEN_CACHE_SIZE;
use crate::consts::SLOW_RETRANS_FACTOR;
use crate::error::Error;
use crate::error::Result;
use crate::ring::Link;
use crate::ring::PeerId;
use crate::stats::StatManager;

/// The terminal outcome delivered to a request's waiter.
#[derive(Debug)]
pub enum ResponseEvent {
    /// The reply body.
    Reply(Message),
    /// No response within the timeout (and retransmission) budget.
    Timeout,
}

/// Future-like handle resolving to the request's terminal outcome.
#[derive(Debug)]
pub struct ResponseWaiter {
    /// Id of the pending request.
    pub msg_id: u64,
    rx: oneshot::Receiver<ResponseEvent>,
}

impl ResponseWaiter {
    /// Wait for the terminal outcome. Resolves with
    /// [Error::ResponseDropped] if the entry was disposed without one.
    pub async fn wait(self) -> Result<ResponseEvent> {
        self.rx.await.map_err(|_| Error::ResponseDropped)
    }
}

struct PendingRequest {
    request: RequestMessage,
    tx: Option<oneshot::Sender<ResponseEvent>>,
    acked: bool,
    /// Entries of forwarded requests only await the next hop's ack.
    ack_only: bool,
    retrans_left: usize,
    sent_at: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Bounded record of recently seen `(sender, msg_id)` pairs, used to execute
/// retransmitted requests at most once.
struct SeenCache {
    set: HashSet<(PeerId, u64)>,
    order: VecDeque<(PeerId, u64)>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `false` when the pair was already recorded.
    fn insert(&mut self, key: (PeerId, u64)) -> bool {
        if !self.set.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// The messaging substrate of one node.
pub struct MessagingFramework {
    me: Link,
    transport: Arc<dyn TransportInterface>,
    stats: Arc<StatManager>,
    config: DdllConfig,
    next_id: AtomicU64,
    msg_store: DashMap<u64, PendingRequest>,
    seen: Mutex<SeenCache>,
}

impl MessagingFramework {
    /// Create the framework for the node `me`.
    pub fn new(
        me: Link,
        transport: Arc<dyn TransportInterface>,
        stats: Arc<StatManager>,
        config: DdllConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            me,
            transport,
            stats,
            config,
            next_id: AtomicU64::new(1),
            msg_store: DashMap::new(),
            seen: Mutex::new(SeenCache::new(SEEN_CACHE_SIZE)),
        })
    }

    /// The link this framework sends as.
    pub fn me(&self) -> &Link {
        &self.me
    }

    /// Number of requests currently awaiting a response.
    pub fn pending(&self) -> usize {
        self.msg_store.len()
    }

    fn next_msg_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ack_delay(&self, mode: RetransMode) -> Duration {
        match mode {
            RetransMode::Slow => self.config.ack_timeout_timer * SLOW_RETRANS_FACTOR,
            _ => self.config.ack_timeout_timer,
        }
    }

    fn retrans_budget(&self, mode: RetransMode) -> usize {
        match mode {
            RetransMode::None => 0,
            RetransMode::Slow | RetransMode::Fast => self.config.max_retransmit,
            RetransMode::Reliable => self.config.max_retransmit * 2,
        }
    }

    async fn send_envelope(&self, dst: PeerId, env: &Envelope) -> Result<()> {
        let bytes = env.to_bincode()?;
        self.transport
            .send_to(&self.me.addr.to_string(), &dst.to_string(), bytes)
            .await?;
        Ok(())
    }

    /// Raw envelope delivery, used when relaying responses toward their root.
    pub async fn forward_envelope(&self, dst: PeerId, env: &Envelope) -> Result<()> {
        self.send_envelope(dst, env).await
    }

    /// Send a request to `dst` and register it for a response.
    pub async fn request(
        self: &Arc<Self>,
        dst: &Link,
        body: Message,
        opts: TransOptions,
    ) -> Result<ResponseWaiter> {
        debug_assert!(opts.expects_response(), "use send_oneway for NoResponse");
        let msg_id = self.next_msg_id();
        let request = RequestMessage {
            sender: self.me.clone(),
            receiver: dst.clone(),
            msg_id,
            reply_to: self.me.clone(),
            reply_id: msg_id,
            opts,
            path: vec![self.me.addr],
            body,
        };

        let (tx, rx) = oneshot::channel();
        self.msg_store.insert(msg_id, PendingRequest {
            request: request.clone(),
            tx: Some(tx),
            acked: false,
            ack_only: false,
            retrans_left: self.retrans_budget(opts.retrans_mode),
            sent_at: Instant::now(),
            timer: None,
        });
        self.arm_timer(msg_id, self.ack_delay(opts.retrans_mode));

        if let Err(e) = self.send_envelope(dst.addr, &Envelope::Request(request)).await {
            self.dispose(msg_id);
            return Err(e);
        }
        Ok(ResponseWaiter { msg_id, rx })
    }

    /// Send a fire-and-forget request: no ack, no reply, no bookkeeping.
    pub async fn send_oneway(&self, dst: &Link, body: Message) -> Result<()> {
        let request = RequestMessage {
            sender: self.me.clone(),
            receiver: dst.clone(),
            msg_id: self.next_msg_id(),
            reply_to: self.me.clone(),
            reply_id: 0,
            opts: TransOptions::no_response(),
            path: vec![self.me.addr],
            body,
        };
        self.send_envelope(dst.addr, &Envelope::Request(request))
            .await
    }

    /// Forward a request one hop further toward its receiver, keeping the
    /// root's `reply_to`/`reply_id` so a `Direct` reply skips the
    /// intermediate hops. This hop still awaits its own ack under a fresh
    /// `msg_id`.
    pub async fn forward_request(
        self: &Arc<Self>,
        next: &Link,
        req: &RequestMessage,
    ) -> Result<()> {
        let msg_id = self.next_msg_id();
        let mut forwarded = req.clone();
        forwarded.sender = self.me.clone();
        forwarded.receiver = next.clone();
        forwarded.msg_id = msg_id;
        forwarded.path.push(self.me.addr);

        if forwarded.opts.expects_response() {
            self.msg_store.insert(msg_id, PendingRequest {
                request: forwarded.clone(),
                tx: None,
                acked: false,
                ack_only: true,
                retrans_left: self.retrans_budget(forwarded.opts.retrans_mode),
                sent_at: Instant::now(),
                timer: None,
            });
            self.arm_timer(msg_id, self.ack_delay(forwarded.opts.retrans_mode));
        }
        self.send_envelope(next.addr, &Envelope::Request(forwarded))
            .await
    }

    /// Send the reply for a handled request, routed per its options.
    pub async fn reply_to(&self, req: &RequestMessage, body: Message) -> Result<()> {
        let dst = match req.opts.response_type {
            // Straight back to the root, however many hops the request took.
            super::payload::ResponseType::Aggregate => {
                *req.path.last().unwrap_or(&req.sender.addr)
            }
            _ => req.reply_to.addr,
        };
        let reply = ReplyMessage {
            sender: self.me.clone(),
            receiver: req.reply_to.clone(),
            reply_id: req.reply_id,
            body,
        };
        self.send_envelope(dst, &Envelope::Reply(reply)).await
    }

    /// Ack a received request without answering it.
    pub async fn ack_request(&self, req: &RequestMessage) -> Result<()> {
        let ack = AckMessage {
            sender: self.me.clone(),
            receiver: req.sender.clone(),
            ack_id: req.msg_id,
        };
        self.send_envelope(req.sender.addr, &Envelope::Ack(ack)).await
    }

    /// Record an incoming request for at-most-once execution. Returns `false`
    /// when this `(sender, msg_id)` was already delivered, in which case the
    /// caller should re-ack without re-executing.
    pub fn register_incoming(&self, req: &RequestMessage) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.insert((req.sender.addr, req.msg_id))
    }

    /// Route an incoming ack to its pending request. An unknown id is a
    /// benign race (the reply arrived first, or the ack is a duplicate).
    pub fn ack_received(self: &Arc<Self>, ack: &AckMessage) {
        let mut rearm = false;
        let mut drop_entry = false;
        match self.msg_store.get_mut(&ack.ack_id) {
            None => {
                tracing::debug!("ack for unknown or finished msg {}", ack.ack_id);
            }
            Some(mut entry) => {
                if !entry.acked {
                    entry.acked = true;
                    self.stats
                        .record_rtt(entry.request.receiver.addr, entry.sent_at.elapsed());
                    if let Some(timer) = entry.timer.take() {
                        timer.abort();
                    }
                    if entry.ack_only {
                        drop_entry = true;
                    } else {
                        // The ack phase is over; keep a timer armed so the
                        // reply phase cannot wait forever either.
                        rearm = true;
                    }
                }
            }
        }
        if drop_entry {
            self.msg_store.remove(&ack.ack_id);
        }
        if rearm {
            self.arm_timer(ack.ack_id, self.config.ack_timeout_timer);
        }
    }

    /// Route an incoming reply to its pending request and resolve it.
    /// An unknown id is a benign race (duplicate reply, or already disposed).
    pub fn reply_received(&self, reply: ReplyMessage) {
        let Some((_, mut entry)) = self.msg_store.remove(&reply.reply_id) else {
            tracing::debug!("reply for unknown or finished msg {}", reply.reply_id);
            return;
        };
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        if !entry.acked {
            // The reply doubles as the ack.
            self.stats
                .record_rtt(entry.request.receiver.addr, entry.sent_at.elapsed());
        }
        if let Some(tx) = entry.tx.take() {
            let _ = tx.send(ResponseEvent::Reply(reply.body));
        }
    }

    /// Drop the pending entry of `msg_id`. Idempotent: disposing twice, or
    /// disposing after a response arrived, is a no-op.
    pub fn dispose(&self, msg_id: u64) {
        if let Some((_, mut entry)) = self.msg_store.remove(&msg_id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, msg_id: u64, delay: Duration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.on_timer(msg_id).await;
        });
        match self.msg_store.get_mut(&msg_id) {
            Some(mut entry) => {
                if let Some(old) = entry.timer.replace(handle) {
                    old.abort();
                }
            }
            // Entry resolved before the timer was stored.
            None => handle.abort(),
        }
    }

    async fn on_timer(self: &Arc<Self>, msg_id: u64) {
        enum Action {
            Nothing,
            Retransmit(RequestMessage),
            Timeout,
        }

        let action = match self.msg_store.get_mut(&msg_id) {
            None => Action::Nothing,
            Some(mut entry) => {
                if !entry.acked
                    && entry.retrans_left > 0
                    && entry.request.opts.retrans_mode != RetransMode::None
                {
                    entry.retrans_left -= 1;
                    Action::Retransmit(entry.request.clone())
                } else {
                    // Either the ack never came and the budget is spent, or
                    // the ack came but the reply is overdue.
                    Action::Timeout
                }
            }
        };

        match action {
            Action::Nothing => {}
            Action::Retransmit(request) => {
                tracing::debug!(
                    "retransmitting msg {} to {} ({} left)",
                    msg_id,
                    request.receiver,
                    self.msg_store
                        .get(&msg_id)
                        .map(|e| e.retrans_left)
                        .unwrap_or(0),
                );
                self.arm_timer(msg_id, self.ack_delay(request.opts.retrans_mode));
                let dst = request.receiver.addr;
                if let Err(e) = self.send_envelope(dst, &Envelope::Request(request)).await {
                    tracing::debug!("retransmission of msg {} failed: {}", msg_id, e);
                }
            }
            Action::Timeout => {
                let Some((_, mut entry)) = self.msg_store.remove(&msg_id) else {
                    return;
                };
                let dst = entry.request.receiver.addr;
                self.stats.record_timeout(dst);
                tracing::debug!("msg {} to {} timed out", msg_id, entry.request.receiver);
                if let Some(tx) = entry.tx.take() {
                    let _ = tx.send(ResponseEvent::Timeout);
                }
            }
        }
    }
}
