#![warn(missing_docs)]

//! The DDLL node state machine.
//!
//! A [DdllStrategy] drives one ring membership through its life cycle
//! `Out -> Ins -> In -> Del -> Out`. All edge changes go through the left
//! endpoint of the edge: a `SetR` request asks it to repoint its right
//! pointer, and only succeeds when the requester's view of that pointer is
//! current; otherwise a `SetRNak` with a retry hint comes back. Accepted
//! changes are pushed to the right-hand side with one-way `SetL` messages
//! guarded by [LinkSeq] values, so reordered or duplicated pushes are
//! detected and dropped.
//!
//! Failure repair (`check_and_fix`) walks the [NeighborSet] for the closest
//! live left node, bumps the repair generation to invalidate stale traffic,
//! and relinks with the same `SetR` exchange. At most one repair runs per
//! node; concurrent callers share the in-flight future.

use std::cmp::max;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use rand::Rng;
use tokio::task::JoinHandle;

use super::key::in_ring_range;
use super::node::Link;
use super::node::LocalNode;
use super::node::Status;
use crate::config::DdllConfig;
use crate::config::RetryMode;
use crate::config::SetRNakMode;
use crate::error::Error;
use crate::error::Result;
use crate::message::framework::MessagingFramework;
use crate::message::framework::ResponseEvent;
use crate::message::payload::RetransMode;
use crate::message::payload::TransOptions;
use crate::message::types::GetCandidates;
use crate::message::types::GetCandidatesReply;
use crate::message::types::Message;
use crate::message::types::PropagateNeighbors;
use crate::message::types::SetL;
use crate::message::types::SetR;
use crate::message::types::SetRAck;
use crate::message::types::SetRNak;
use crate::message::types::SetRType;
use crate::stats::StatManager;

/// The shared future of an in-flight repair. Resolves to `true` when the
/// repair landed (or turned out unnecessary), `false` when the retry budget
/// of this invocation was spent.
pub type FixFuture = Shared<BoxFuture<'static, bool>>;

/// What a handled `SetR` turned into.
#[derive(Debug)]
pub enum SetRDisposition {
    /// The edge was updated; reply the ack and optionally push a `SetL`.
    Ack {
        /// The positive response for the requester.
        ack: SetRAck,
        /// A left-pointer push owed to the (old or new) right neighbor.
        setl: Option<(Link, SetL)>,
    },
    /// The request did not match the current state.
    Nak(SetRNak),
}

enum FixOutcome {
    Done,
    Retry,
}

/// The state machine of one local ring member.
pub struct DdllStrategy {
    me: Link,
    msgr: Arc<MessagingFramework>,
    stats: Arc<StatManager>,
    config: DdllConfig,
    node: Mutex<LocalNode>,
    fix: Mutex<Option<FixFuture>>,
    probe: Mutex<Option<JoinHandle<()>>>,
    /// Number of `SetRNak` answers seen while joining.
    pub join_naks: AtomicUsize,
    /// Number of repairs started.
    pub fixes_started: AtomicUsize,
}

impl Drop for DdllStrategy {
    fn drop(&mut self) {
        if let Ok(mut probe) = self.probe.lock() {
            if let Some(handle) = probe.take() {
                handle.abort();
            }
        }
    }
}

impl DdllStrategy {
    /// Create the state machine for the member `me`, initially `Out`.
    pub fn new(
        me: Link,
        msgr: Arc<MessagingFramework>,
        stats: Arc<StatManager>,
        config: DdllConfig,
    ) -> Arc<Self> {
        let node = LocalNode::new(me.clone(), config.neighbor_set_size);
        Arc::new(Self {
            me,
            msgr,
            stats,
            config,
            node: Mutex::new(node),
            fix: Mutex::new(None),
            probe: Mutex::new(None),
            join_naks: AtomicUsize::new(0),
            fixes_started: AtomicUsize::new(0),
        })
    }

    /// Link to this member.
    pub fn me(&self) -> &Link {
        &self.me
    }

    /// Current membership status.
    pub fn status(&self) -> Status {
        self.lock_node().map(|n| n.status).unwrap_or(Status::Out)
    }

    /// Current left neighbor.
    pub fn pred(&self) -> Option<Link> {
        self.lock_node().ok().and_then(|n| n.pred.clone())
    }

    /// Current right neighbor.
    pub fn succ(&self) -> Option<Link> {
        self.lock_node().ok().and_then(|n| n.succ.clone())
    }

    /// Current left-neighbor candidates, closest first.
    pub fn neighbors(&self) -> Vec<Link> {
        self.lock_node()
            .map(|n| n.nbrs.candidates())
            .unwrap_or_default()
    }

    fn lock_node(&self) -> Result<MutexGuard<LocalNode>> {
        self.node.lock().map_err(|_| Error::StateLock)
    }

    /// Become the sole member of a fresh ring.
    pub fn insert_as_initial(self: &Arc<Self>) -> Result<()> {
        {
            let mut n = self.lock_node()?;
            if n.status != Status::Out {
                return Err(Error::InvalidState("insert_as_initial"));
            }
            n.status = Status::In;
            n.pred = Some(self.me.clone());
            n.succ = Some(self.me.clone());
        }
        self.start_probe();
        Ok(())
    }

    /// Insert this member between `pred` and `succ`.
    ///
    /// Performs the `SetR` exchange with `pred`, following `SetRNak` hints
    /// according to the configured [SetRNakMode], up to the retry budget.
    /// Resolves `Ok(false)` when the attempt should be restarted from a fresh
    /// neighbor search.
    pub async fn join(self: &Arc<Self>, pred: Link, succ: Link) -> Result<bool> {
        if self.status() != Status::Out {
            return Err(Error::InvalidState("join"));
        }

        let mut pred = pred;
        let mut succ = succ;
        for _ in 0..self.config.retry_count {
            let seq = {
                let mut n = self.lock_node()?;
                n.status = Status::Ins;
                n.pred = Some(pred.clone());
                n.succ = Some(succ.clone());
                n.lseq.next()
            };
            let setr = SetR {
                r_new: self.me.clone(),
                r_cur: succ.clone(),
                kind: SetRType::Normal,
                seq,
            };
            let waiter = match self
                .msgr
                .request(&pred, Message::SetR(setr), TransOptions::direct())
                .await
            {
                Ok(waiter) => waiter,
                Err(e) => {
                    self.reset_to_out()?;
                    return Err(e);
                }
            };

            let event = match waiter.wait().await {
                Ok(event) => event,
                Err(e) => {
                    self.reset_to_out()?;
                    return Err(e);
                }
            };
            match event {
                ResponseEvent::Reply(Message::SetRAck(ack)) => {
                    {
                        let mut n = self.lock_node()?;
                        n.advance_lseq(ack.seq);
                        if let Some(fwd) = ack.fwd_seq {
                            n.advance_rseq(fwd);
                        }
                        n.nbrs.merge(&ack.nbrs);
                        n.nbrs.add(pred.clone());
                        n.status = Status::In;
                    }
                    self.start_probe();
                    tracing::info!("{} joined between {} and {}", self.me, pred, succ);
                    return Ok(true);
                }
                ResponseEvent::Reply(Message::SetRNak(nak)) => {
                    self.join_naks.fetch_add(1, Ordering::Relaxed);
                    self.reset_to_out()?;
                    tracing::debug!("{} join refused by {}, hint {:?}", self.me, pred, nak.hint);
                    match (self.config.setrnak_mode, nak.hint) {
                        (SetRNakMode::Opt1, Some((p, s))) => {
                            pred = p;
                            succ = s;
                        }
                        (SetRNakMode::Opt2, Some((p, s))) if p.key == pred.key => {
                            pred = p;
                            succ = s;
                        }
                        (SetRNakMode::Opt2, Some(_)) => return Ok(false),
                        _ => self.retry_backoff().await,
                    }
                }
                ResponseEvent::Timeout => {
                    self.reset_to_out()?;
                    tracing::warn!("{} join via {} timed out", self.me, pred);
                    return Ok(false);
                }
                ResponseEvent::Reply(other) => {
                    self.reset_to_out()?;
                    tracing::error!("unexpected reply {} to SetR", other);
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }

    /// Remove this member from the ring.
    ///
    /// A leave issued while a repair is in flight waits for the repair to
    /// complete first. Resolves `Ok(false)` when the retry budget is spent;
    /// the member is back in status `In` then.
    pub async fn leave(self: &Arc<Self>) -> Result<bool> {
        loop {
            let fix = self.fix.lock().map_err(|_| Error::StateLock)?.clone();
            match fix {
                Some(f) => {
                    f.await;
                }
                None => break,
            }
        }

        {
            let mut n = self.lock_node()?;
            if n.status != Status::In {
                return Err(Error::InvalidState("leave"));
            }
            if n.succ.as_ref().map(|s| s.key == n.me.key).unwrap_or(false) {
                // Sole member: nobody to talk to.
                n.status = Status::Out;
                n.pred = None;
                n.succ = None;
                drop(n);
                self.stop_probe();
                return Ok(true);
            }
        }

        for _ in 0..self.config.retry_count {
            let (pred, succ, seq) = {
                let mut n = self.lock_node()?;
                if n.status != Status::In {
                    return Err(Error::InvalidState("leave"));
                }
                let (Some(pred), Some(succ)) = (n.pred.clone(), n.succ.clone()) else {
                    unreachable!("inserted node must have pred and succ");
                };
                if succ.key == n.me.key {
                    // A repair in between healed us into a singleton.
                    n.status = Status::Out;
                    n.pred = None;
                    n.succ = None;
                    drop(n);
                    self.stop_probe();
                    return Ok(true);
                }
                n.status = Status::Del;
                (pred, succ, n.rseq.next())
            };
            let setr = SetR {
                r_new: succ,
                r_cur: self.me.clone(),
                kind: SetRType::Normal,
                seq,
            };
            let waiter = match self
                .msgr
                .request(&pred, Message::SetR(setr), TransOptions::direct())
                .await
            {
                Ok(waiter) => waiter,
                Err(e) => {
                    tracing::warn!("{} leave via {} failed to send: {}", self.me, pred, e);
                    self.back_to_in()?;
                    self.check_and_fix().await;
                    continue;
                }
            };

            let event = match waiter.wait().await {
                Ok(event) => event,
                Err(e) => {
                    self.back_to_in()?;
                    return Err(e);
                }
            };
            match event {
                ResponseEvent::Reply(Message::SetRAck(_)) => {
                    {
                        let mut n = self.lock_node()?;
                        n.status = Status::Out;
                        n.pred = None;
                        n.succ = None;
                    }
                    self.stop_probe();
                    tracing::info!("{} left the ring", self.me);
                    return Ok(true);
                }
                ResponseEvent::Reply(Message::SetRNak(_)) => {
                    self.back_to_in()?;
                    self.random_backoff().await;
                }
                ResponseEvent::Timeout => {
                    // The left neighbor is presumably dead; repair and retry
                    // against the new one.
                    self.back_to_in()?;
                    self.check_and_fix().await;
                }
                ResponseEvent::Reply(other) => {
                    self.back_to_in()?;
                    tracing::error!("unexpected reply {} to SetR", other);
                }
            }
        }
        Ok(false)
    }

    fn reset_to_out(&self) -> Result<()> {
        let mut n = self.lock_node()?;
        n.status = Status::Out;
        n.pred = None;
        n.succ = None;
        Ok(())
    }

    fn back_to_in(&self) -> Result<()> {
        let mut n = self.lock_node()?;
        n.status = Status::In;
        Ok(())
    }

    async fn retry_backoff(&self) {
        let delay = match self.config.retry_mode {
            RetryMode::Immed => Duration::ZERO,
            RetryMode::Const => self.config.retry_delay,
            RetryMode::Random => {
                let bound = self.config.retry_delay.as_millis() as u64 * 2;
                Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn random_backoff(&self) {
        let bound = self.config.retry_delay.as_millis() as u64 * 2;
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=bound));
        tokio::time::sleep(delay).await;
    }

    // ------------------------------------------------------------------
    // Protocol request handlers. These run synchronously under the node
    // lock and only compute state changes plus the messages owed to other
    // nodes; the dispatcher performs the sends.
    // ------------------------------------------------------------------

    /// Handle a `SetR` request: this node is the left endpoint of the edge
    /// being modified.
    pub fn handle_setr(&self, msg: &SetR) -> Result<SetRDisposition> {
        let mut n = self.lock_node()?;
        if !n.status.is_inserted() {
            return Ok(SetRDisposition::Nak(SetRNak { hint: None }));
        }
        let Some(succ) = n.succ.clone() else {
            unreachable!("inserted node must have a successor");
        };

        if succ.key != msg.r_cur.key {
            // The requester's view is stale. Hint at the side the mismatch
            // lies on: if its target position is still between us and our
            // successor it should retry on our edge, otherwise further right.
            let hint = if in_ring_range(&msg.r_new.key, &n.me.key, &succ.key) {
                Some((n.me.clone(), succ))
            } else {
                Some((succ, msg.r_cur.clone()))
            };
            tracing::debug!("{} naks SetR from {}", n.me, msg.r_new);
            return Ok(SetRDisposition::Nak(SetRNak { hint }));
        }

        let me_link = n.me.clone();
        // Deriving from the max of both sides keeps every counter monotone
        // at every node the new sequences reach.
        let base = max(msg.seq, n.rseq).next();
        let insertion = in_ring_range(&msg.r_new.key, &n.me.key, &msg.r_cur.key);

        let (ack_seq, fwd_seq, setl) = match msg.kind {
            SetRType::LeftOnly => {
                // The old right neighbor is presumed dead; nothing to push.
                n.nbrs.remove(&msg.r_cur.key);
                (base, None, None)
            }
            SetRType::Normal | SetRType::Both if insertion => {
                n.nbrs.add(msg.r_new.clone());
                let fwd = base;
                let ack_seq = base.next();
                if msg.r_cur.key == n.me.key {
                    // We are our own right neighbor (singleton ring): apply
                    // the left-pointer update locally.
                    n.pred = Some(msg.r_new.clone());
                    n.advance_lseq(fwd);
                    (ack_seq, Some(fwd), None)
                } else {
                    let setl = SetL {
                        l_new: msg.r_new.clone(),
                        seq: fwd,
                        nbrs: n.nbrs.set_for_right(&msg.r_cur.key),
                    };
                    (ack_seq, Some(fwd), Some((msg.r_cur.clone(), setl)))
                }
            }
            _ => {
                // Deletion: r_cur leaves the ring and its old successor
                // r_new becomes ours, learning its new left neighbor from us.
                n.nbrs.remove(&msg.r_cur.key);
                if msg.r_new.key == n.me.key {
                    // The ring shrinks back to just us.
                    n.pred = Some(me_link.clone());
                    n.advance_lseq(base);
                    (base, None, None)
                } else {
                    let setl = SetL {
                        l_new: me_link.clone(),
                        seq: base,
                        nbrs: n.nbrs.set_for_right(&msg.r_new.key),
                    };
                    (base, None, Some((msg.r_new.clone(), setl)))
                }
            }
        };

        let ack = SetRAck {
            seq: ack_seq,
            fwd_seq,
            nbrs: n.nbrs.set_for_right(&msg.r_new.key),
        };
        n.succ = Some(msg.r_new.clone());
        n.advance_rseq(ack_seq);
        tracing::debug!(
            "{} accepted SetR: succ {} -> {} (seq {})",
            me_link,
            msg.r_cur,
            msg.r_new,
            ack_seq
        );
        Ok(SetRDisposition::Ack { ack, setl })
    }

    /// Handle a `SetL` push: this node is the right endpoint of the edge.
    /// Returns the neighbor propagation owed to the successor, if any.
    pub fn handle_setl(&self, msg: &SetL) -> Result<Option<(Link, PropagateNeighbors)>> {
        let mut n = self.lock_node()?;
        if msg.seq <= n.lseq {
            tracing::debug!(
                "{} ignores stale SetL (seq {} <= lseq {})",
                n.me,
                msg.seq,
                n.lseq
            );
            return Ok(None);
        }

        let old_pred = n.pred.replace(msg.l_new.clone());
        n.lseq = msg.seq;
        let mut changed = n.nbrs.merge(&msg.nbrs);
        changed |= n.nbrs.add(msg.l_new.clone());

        // The relative order of the old and the new left neighbor tells
        // whether the edge change was an insertion or a deletion.
        let insertion = match &old_pred {
            Some(old) => in_ring_range(&msg.l_new.key, &old.key, &n.me.key),
            None => true,
        };
        let removed = if insertion {
            None
        } else {
            if let Some(old) = &old_pred {
                n.nbrs.remove(&old.key);
            }
            old_pred.map(|l| l.key)
        };

        if !changed && removed.is_none() {
            return Ok(None);
        }
        let Some(succ) = n.succ.clone() else {
            return Ok(None);
        };
        if succ.key == n.me.key {
            return Ok(None);
        }
        let wave = PropagateNeighbors {
            src: n.me.key.clone(),
            nbrs: n.nbrs.set_for_right(&succ.key),
            removed,
            limit: n.me.key.clone(),
        };
        Ok(Some((succ, wave)))
    }

    /// Handle a neighbor propagation wave; returns the hop to forward, if
    /// the wave is still making a difference.
    pub fn handle_propagate(
        &self,
        msg: &PropagateNeighbors,
    ) -> Result<Option<(Link, PropagateNeighbors)>> {
        let mut n = self.lock_node()?;
        if msg.src == n.me.key {
            // Came full circle.
            return Ok(None);
        }
        let mut changed = false;
        if let Some(removed) = &msg.removed {
            changed |= n.nbrs.remove(removed);
        }
        changed |= n.nbrs.merge(&msg.nbrs);
        if !changed {
            return Ok(None);
        }
        let Some(succ) = n.succ.clone() else {
            return Ok(None);
        };
        if succ.key == n.me.key || succ.key == msg.src || succ.key == msg.limit {
            return Ok(None);
        }
        let wave = PropagateNeighbors {
            src: msg.src.clone(),
            nbrs: n.nbrs.set_for_right(&succ.key),
            removed: msg.removed.clone(),
            limit: msg.limit.clone(),
        };
        Ok(Some((succ, wave)))
    }

    /// Handle a candidate query from `origin`.
    pub fn handle_get_candidates(&self, msg: &GetCandidates) -> Result<GetCandidatesReply> {
        let n = self.lock_node()?;
        if !n.status.is_inserted() {
            return Ok(GetCandidatesReply {
                candidates: vec![],
                succ: None,
            });
        }
        Ok(GetCandidatesReply {
            candidates: n.nbrs.set_for_right(&msg.origin.key),
            succ: n.succ.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Failure repair.
    // ------------------------------------------------------------------

    /// Repair the left edge after a suspected failure or inconsistency.
    ///
    /// At most one repair runs per node: re-entrant calls receive the same
    /// in-flight [FixFuture]. The repair retries internally and resolves
    /// `true` once the ring edge is consistent again (or the node is no
    /// longer `In`), `false` when this invocation's retry budget is spent.
    pub fn check_and_fix(self: &Arc<Self>) -> FixFuture {
        let mut guard = match self.fix.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(fut) = guard.as_ref() {
            return fut.clone();
        }
        self.fixes_started.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        let fut = async move {
            let done = this.run_fix().await;
            if let Ok(mut guard) = this.fix.lock() {
                *guard = None;
            }
            done
        }
        .boxed()
        .shared();
        *guard = Some(fut.clone());
        fut
    }

    /// The repair loop: CHECKING (find the closest live left node) then
    /// FIXING (relink), repeated until the fix lands.
    async fn run_fix(self: &Arc<Self>) -> bool {
        for _ in 0..self.config.fix_retry_max {
            if self.status() != Status::In {
                return true;
            }
            let Some((left, left_succ)) = self.run_check().await else {
                self.random_backoff().await;
                continue;
            };
            match self.apply_fix(left, left_succ).await {
                Ok(FixOutcome::Done) => return true,
                Ok(FixOutcome::Retry) => {
                    self.random_backoff().await;
                }
                Err(e) => {
                    tracing::warn!("{} repair round failed: {}", self.me, e);
                    self.random_backoff().await;
                }
            }
        }
        tracing::warn!("{} giving up on repair for now", self.me);
        false
    }

    /// Find the closest live left node and its successor, walking the
    /// neighbor set and the remote candidate chains, skipping endpoints the
    /// stats flag as possibly failed.
    async fn run_check(self: &Arc<Self>) -> Option<(Link, Option<Link>)> {
        let cands = match self.lock_node() {
            Ok(n) => n.nbrs.candidates(),
            Err(_) => return None,
        };

        for cand in cands {
            if cand.key == self.me.key {
                continue;
            }
            if self.stats.possibly_failed(cand.addr) {
                tracing::debug!("{} skips possibly failed candidate {}", self.me, cand);
                continue;
            }
            let request = Message::GetCandidates(GetCandidates {
                origin: self.me.clone(),
            });
            let waiter = match self
                .msgr
                .request(&cand, request, TransOptions::direct_with(RetransMode::None))
                .await
            {
                Ok(waiter) => waiter,
                Err(_) => continue,
            };
            match waiter.wait().await {
                Ok(ResponseEvent::Reply(Message::GetCandidatesReply(reply))) => {
                    // Whatever the candidate knows about the left side is
                    // worth keeping for later rounds.
                    if let Ok(mut n) = self.lock_node() {
                        n.nbrs.merge(&reply.candidates);
                    }
                    return Some((cand, reply.succ));
                }
                Ok(ResponseEvent::Timeout) | Err(_) => continue,
                Ok(ResponseEvent::Reply(other)) => {
                    tracing::error!("unexpected reply {} to GetCandidates", other);
                    continue;
                }
            }
        }

        // No live left candidate at all: we are on our own.
        Some((self.me.clone(), None))
    }

    /// Relink toward `left`, whose successor is `left_succ`.
    async fn apply_fix(self: &Arc<Self>, left: Link, left_succ: Option<Link>) -> Result<FixOutcome> {
        {
            let mut n = self.lock_node()?;
            if n.status != Status::In {
                return Ok(FixOutcome::Done);
            }
            if left.key == n.me.key {
                // Every known left neighbor is gone: heal into a singleton.
                if n.succ.as_ref().map(|s| s.key != n.me.key).unwrap_or(true) {
                    tracing::warn!("{} lost all neighbors, healing as singleton", n.me);
                    n.succ = Some(n.me.clone());
                    n.pred = Some(n.me.clone());
                    n.lseq = n.lseq.gnext();
                    n.rseq = n.rseq.gnext();
                }
                return Ok(FixOutcome::Done);
            }
            if let Some(s) = &left_succ {
                if s.key == n.me.key {
                    // The edge is already right; just adopt the left side.
                    if n.pred.as_ref().map(|p| p.key != left.key).unwrap_or(true) {
                        n.pred = Some(left.clone());
                    }
                    n.nbrs.add(left.clone());
                    return Ok(FixOutcome::Done);
                }
            }
        }

        let (kind, r_cur) = match left_succ {
            None => return Ok(FixOutcome::Retry),
            Some(s) => {
                if in_ring_range(&self.me.key, &left.key, &s.key) {
                    // We must re-insert between left and its live successor.
                    (SetRType::Both, s)
                } else if self.stats.possibly_failed(s.addr) {
                    // left still points at a dead node between us; only the
                    // left side of this node changes.
                    (SetRType::LeftOnly, s)
                } else {
                    // A live node sits between left and us: it is a closer
                    // left candidate, probe it next round.
                    if let Ok(mut n) = self.lock_node() {
                        n.nbrs.add(s);
                    }
                    return Ok(FixOutcome::Retry);
                }
            }
        };

        // Invalidate any in-flight pre-repair traffic on our left edge.
        let seq = {
            let mut n = self.lock_node()?;
            n.lseq = n.lseq.gnext();
            n.lseq
        };
        let setr = SetR {
            r_new: self.me.clone(),
            r_cur: r_cur.clone(),
            kind,
            seq,
        };
        tracing::info!(
            "{} repairing left edge via {} ({:?})",
            self.me,
            left,
            kind
        );
        let waiter = self
            .msgr
            .request(&left, Message::SetR(setr), TransOptions::direct())
            .await?;
        match waiter.wait().await? {
            ResponseEvent::Reply(Message::SetRAck(ack)) => {
                let mut n = self.lock_node()?;
                n.pred = Some(left.clone());
                n.advance_lseq(ack.seq);
                if kind == SetRType::Both {
                    n.succ = Some(r_cur.clone());
                    if let Some(fwd) = ack.fwd_seq {
                        n.advance_rseq(fwd);
                    }
                }
                n.nbrs.merge(&ack.nbrs);
                n.nbrs.add(left.clone());
                Ok(FixOutcome::Done)
            }
            ResponseEvent::Reply(Message::SetRNak(_)) => Ok(FixOutcome::Retry),
            ResponseEvent::Timeout => Ok(FixOutcome::Retry),
            ResponseEvent::Reply(other) => {
                tracing::error!("unexpected reply {} to repair SetR", other);
                Ok(FixOutcome::Retry)
            }
        }
    }

    // ------------------------------------------------------------------
    // Liveness probing.
    // ------------------------------------------------------------------

    /// Start the periodic left-neighbor probe. A no-op when probing is
    /// disabled or already running.
    pub fn start_probe(self: &Arc<Self>) {
        if self.config.ping_period.is_zero() {
            return;
        }
        let mut guard = match self.probe.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.config.ping_period;
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(this) = weak.upgrade() else { break };
                this.probe_once().await;
            }
        }));
    }

    fn stop_probe(&self) {
        let mut guard = match self.probe.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    /// One probe round: ask the left neighbor for its view of our edge.
    pub async fn probe_once(self: &Arc<Self>) {
        let (status, pred) = match self.lock_node() {
            Ok(n) => (n.status, n.pred.clone()),
            Err(_) => return,
        };
        if status != Status::In {
            return;
        }
        let Some(pred) = pred else { return };
        if pred.key == self.me.key {
            return;
        }

        let request = Message::GetCandidates(GetCandidates {
            origin: self.me.clone(),
        });
        let waiter = match self
            .msgr
            .request(&pred, request, TransOptions::direct_with(RetransMode::None))
            .await
        {
            Ok(waiter) => waiter,
            Err(e) => {
                tracing::warn!("{} probe to {} failed to send: {}", self.me, pred, e);
                self.check_and_fix().await;
                return;
            }
        };
        match waiter.wait().await {
            Ok(ResponseEvent::Reply(Message::GetCandidatesReply(reply))) => {
                if let Ok(mut n) = self.lock_node() {
                    n.nbrs.merge(&reply.candidates);
                }
                let consistent = reply
                    .succ
                    .as_ref()
                    .map(|s| s.key == self.me.key)
                    .unwrap_or(false);
                if !consistent {
                    tracing::warn!(
                        "{} left neighbor {} disagrees about the edge, repairing",
                        self.me,
                        pred
                    );
                    self.check_and_fix().await;
                }
            }
            Ok(ResponseEvent::Timeout) | Err(_) => {
                tracing::warn!("{} left neighbor {} suspected failed", self.me, pred);
                self.check_and_fix().await;
            }
            Ok(ResponseEvent::Reply(other)) => {
                tracing::error!("unexpected probe reply {}", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ddll_transport::connections::ChannelTransport;

    use super::*;
    use crate::ring::DdllKey;
    use crate::ring::LinkSeq;
    use crate::ring::UniqId;

    fn link(raw: i64) -> Link {
        let id = UniqId::from_u64(raw as u64);
        Link::new(id, DdllKey::new(raw, id, "l", 0))
    }

    fn strategy(raw: i64) -> Arc<DdllStrategy> {
        let me = link(raw);
        let stats = Arc::new(StatManager::new(2));
        let msgr = MessagingFramework::new(
            me.clone(),
            ChannelTransport::new(),
            stats.clone(),
            DdllConfig::default(),
        );
        DdllStrategy::new(me, msgr, stats, DdllConfig::default())
    }

    /// Put the node into an inserted state without a network.
    fn seed_inserted(strategy: &Arc<DdllStrategy>, pred: Link, succ: Link) {
        let mut n = strategy.lock_node().unwrap();
        n.status = Status::In;
        n.pred = Some(pred);
        n.succ = Some(succ);
    }

    #[tokio::test]
    async fn test_setr_nak_when_not_inserted() {
        let s = strategy(100);
        let msg = SetR {
            r_new: link(150),
            r_cur: link(200),
            kind: SetRType::Normal,
            seq: LinkSeq::ZERO,
        };
        match s.handle_setr(&msg).unwrap() {
            SetRDisposition::Nak(nak) => assert!(nak.hint.is_none()),
            other => panic!("expected Nak, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_setr_nak_hints_point_at_the_mismatch() {
        let s = strategy(100);
        seed_inserted(&s, link(50), link(200));

        // Requester thinks our successor is 300, but a node at 200 got in
        // first. Its target 150 is still on our edge: hint (self, succ).
        let msg = SetR {
            r_new: link(150),
            r_cur: link(300),
            kind: SetRType::Normal,
            seq: LinkSeq::ZERO,
        };
        match s.handle_setr(&msg).unwrap() {
            SetRDisposition::Nak(nak) => {
                let (p, su) = nak.hint.unwrap();
                assert_eq!(p.key, link(100).key);
                assert_eq!(su.key, link(200).key);
            }
            other => panic!("expected Nak, got {:?}", other),
        }

        // Target 250 now belongs beyond our successor: hint (succ, r_cur).
        let msg = SetR {
            r_new: link(250),
            r_cur: link(300),
            kind: SetRType::Normal,
            seq: LinkSeq::ZERO,
        };
        match s.handle_setr(&msg).unwrap() {
            SetRDisposition::Nak(nak) => {
                let (p, su) = nak.hint.unwrap();
                assert_eq!(p.key, link(200).key);
                assert_eq!(su.key, link(300).key);
            }
            other => panic!("expected Nak, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_setr_insertion_updates_edge_and_seq() {
        let s = strategy(100);
        seed_inserted(&s, link(50), link(200));

        let msg = SetR {
            r_new: link(150),
            r_cur: link(200),
            kind: SetRType::Normal,
            seq: LinkSeq::ZERO.next(),
        };
        let rseq_before = s.lock_node().unwrap().rseq;
        match s.handle_setr(&msg).unwrap() {
            SetRDisposition::Ack { ack, setl } => {
                assert!(ack.seq > rseq_before);
                let (dst, setl) = setl.unwrap();
                assert_eq!(dst.key, link(200).key);
                assert_eq!(setl.l_new.key, link(150).key);
                assert_eq!(Some(setl.seq), ack.fwd_seq);
                assert!(setl.seq < ack.seq);
                // The new node learns its closest lefts, ourselves first.
                assert_eq!(ack.nbrs[0].key, link(100).key);
            }
            other => panic!("expected Ack, got {:?}", other),
        }
        let n = s.lock_node().unwrap();
        assert_eq!(n.succ.as_ref().unwrap().key, link(150).key);
        assert!(n.rseq > rseq_before);
    }

    #[tokio::test]
    async fn test_setr_deletion_shrinks_to_singleton() {
        let s = strategy(100);
        // Two-node ring: 100 <-> 200; 200 leaves.
        seed_inserted(&s, link(200), link(200));
        let msg = SetR {
            r_new: link(100),
            r_cur: link(200),
            kind: SetRType::Normal,
            seq: LinkSeq::ZERO.next(),
        };
        match s.handle_setr(&msg).unwrap() {
            SetRDisposition::Ack { setl, .. } => assert!(setl.is_none()),
            other => panic!("expected Ack, got {:?}", other),
        }
        let n = s.lock_node().unwrap();
        assert_eq!(n.succ.as_ref().unwrap().key, link(100).key);
        assert_eq!(n.pred.as_ref().unwrap().key, link(100).key);
    }

    #[tokio::test]
    async fn test_stale_setl_replay_changes_nothing() {
        let s = strategy(100);
        seed_inserted(&s, link(50), link(200));

        let newer = SetL {
            l_new: link(80),
            seq: LinkSeq::new(0, 5),
            nbrs: vec![link(80), link(50)],
        };
        s.handle_setl(&newer).unwrap();
        assert_eq!(s.pred().unwrap().key, link(80).key);

        // Replay an older push (lower seq): provably rejected.
        let older = SetL {
            l_new: link(60),
            seq: LinkSeq::new(0, 3),
            nbrs: vec![link(60)],
        };
        let wave = s.handle_setl(&older).unwrap();
        assert!(wave.is_none());
        {
            let n = s.lock_node().unwrap();
            assert_eq!(n.pred.as_ref().unwrap().key, link(80).key);
            assert_eq!(n.lseq, LinkSeq::new(0, 5));
            assert!(!n.nbrs.contains(&link(60).key));
        }

        // An equal seq is stale too.
        let equal = SetL {
            l_new: link(60),
            seq: LinkSeq::new(0, 5),
            nbrs: vec![],
        };
        assert!(s.handle_setl(&equal).unwrap().is_none());

        // A pre-repair generation never beats a post-repair one.
        let post_repair = SetL {
            l_new: link(70),
            seq: LinkSeq::new(1, 0),
            nbrs: vec![],
        };
        s.handle_setl(&post_repair).unwrap();
        let pre_repair = SetL {
            l_new: link(90),
            seq: LinkSeq::new(0, 99),
            nbrs: vec![],
        };
        assert!(s.handle_setl(&pre_repair).unwrap().is_none());
        assert_eq!(s.pred().unwrap().key, link(70).key);
    }

    #[tokio::test]
    async fn test_setl_deletion_propagates_removal() {
        let s = strategy(100);
        seed_inserted(&s, link(80), link(200));
        {
            let mut n = s.lock_node().unwrap();
            n.nbrs.add(link(80));
            n.nbrs.add(link(50));
        }

        // 80 left the ring: the new left neighbor 50 is before the old one.
        let setl = SetL {
            l_new: link(50),
            seq: LinkSeq::new(0, 7),
            nbrs: vec![link(50)],
        };
        let (dst, wave) = s.handle_setl(&setl).unwrap().unwrap();
        assert_eq!(dst.key, link(200).key);
        assert_eq!(wave.removed, Some(link(80).key));
        let n = s.lock_node().unwrap();
        assert!(!n.nbrs.contains(&link(80).key));
        assert_eq!(n.pred.as_ref().unwrap().key, link(50).key);
    }

    #[tokio::test]
    async fn test_propagate_stops_when_nothing_changes() {
        let s = strategy(100);
        seed_inserted(&s, link(50), link(200));
        {
            let mut n = s.lock_node().unwrap();
            n.nbrs.add(link(50));
        }
        let wave = PropagateNeighbors {
            src: link(40).key,
            nbrs: vec![link(50)],
            removed: None,
            limit: link(40).key,
        };
        // Everything already known: the wave dies here.
        assert!(s.handle_propagate(&wave).unwrap().is_none());

        // New information keeps it travelling toward our successor.
        let wave = PropagateNeighbors {
            src: link(40).key,
            nbrs: vec![link(40)],
            removed: None,
            limit: link(40).key,
        };
        let (dst, fwd) = s.handle_propagate(&wave).unwrap().unwrap();
        assert_eq!(dst.key, link(200).key);
        assert_eq!(fwd.src, link(40).key);
    }

    #[tokio::test]
    async fn test_concurrent_fix_shares_the_inflight_future() {
        let s = strategy(100);
        // Not inserted: the repair resolves immediately, but both callers
        // must still observe the same in-flight future object.
        let f1 = s.check_and_fix();
        let f2 = s.check_and_fix();
        assert!(f1.ptr_eq(&f2));
        assert!(f1.await);
        assert!(f2.await);
        assert_eq!(s.fixes_started.load(Ordering::Relaxed), 1);

        // After completion a fresh repair may start.
        let f3 = s.check_and_fix();
        assert!(f3.await);
        assert_eq!(s.fixes_started.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_insert_as_initial_is_a_singleton_ring() {
        let s = strategy(100);
        s.insert_as_initial().unwrap();
        assert_eq!(s.status(), Status::In);
        assert_eq!(s.pred().unwrap().key, s.me().key);
        assert_eq!(s.succ().unwrap().key, s.me().key);
        assert!(s.insert_as_initial().is_err());
    }
}
