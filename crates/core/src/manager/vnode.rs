//! One keyed membership of a peer in the ring.

use std::sync::Arc;
use std::sync::Mutex;

use crate::message::MessagingFramework;
use crate::ring::DdllKey;
use crate::ring::DdllStrategy;
use crate::ring::RawKey;

/// Life cycle of a virtual node, as seen by the manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VNodeMode {
    /// Created, nothing attempted yet.
    Out,
    /// Insertion in progress.
    Inserting,
    /// Member of the ring.
    Inserted,
    /// Deletion in progress.
    Deleting,
    /// Gone; the vnode is about to be dropped.
    Deleted,
}

/// A virtual node: binds one [DdllKey] to a peer. A peer may hold several,
/// each progressing independently.
pub struct RingVNode {
    /// The raw key this vnode was created for.
    pub raw: RawKey,
    /// The full ring key (raw + owner + nonce).
    pub key: DdllKey,
    mode: Mutex<VNodeMode>,
    framework: Arc<MessagingFramework>,
    /// The ring state machine of this member.
    pub strategy: Arc<DdllStrategy>,
}

impl RingVNode {
    pub(crate) fn new(
        raw: RawKey,
        key: DdllKey,
        framework: Arc<MessagingFramework>,
        strategy: Arc<DdllStrategy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            raw,
            key,
            mode: Mutex::new(VNodeMode::Out),
            framework,
            strategy,
        })
    }

    /// Current life-cycle mode.
    pub fn mode(&self) -> VNodeMode {
        match self.mode.lock() {
            Ok(mode) => *mode,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set_mode(&self, mode: VNodeMode) {
        match self.mode.lock() {
            Ok(mut guard) => *guard = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }

    /// The messaging framework of this member.
    pub fn framework(&self) -> &Arc<MessagingFramework> {
        &self.framework
    }
}
