use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;

use crate::core::callback::SharedTransportCallback;
use crate::core::transport::TransportInterface;
use crate::error::Error;
use crate::error::Result;

/// Max delivery delay in ms when delays are enabled.
const CHANNEL_DELAY_MAX_MS: u64 = 20;

/// An in-memory transport for local testing.
///
/// All endpoints of one logical network share a single `ChannelTransport`
/// instance (clone the `Arc`). There is deliberately no global registry:
/// parallel tests each build an isolated network.
///
/// Fault injection:
/// - [block](ChannelTransport::block) silently discards all traffic from and
///   to an endpoint, simulating a crashed peer.
/// - [set_loss_rate](ChannelTransport::set_loss_rate) drops a random fraction
///   of messages.
/// - [set_delay](ChannelTransport::set_delay) delays each delivery by a random
///   amount, which also reorders messages.
pub struct ChannelTransport {
    callbacks: DashMap<String, SharedTransportCallback>,
    blocked: DashMap<String, ()>,
    /// Loss rate in 1/1000 units, so it fits an atomic.
    loss_per_mille: AtomicU32,
    delay: AtomicU32,
}

impl ChannelTransport {
    /// Create a new network. Endpoints join it via
    /// [listen](TransportInterface::listen).
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: DashMap::new(),
            blocked: DashMap::new(),
            loss_per_mille: AtomicU32::new(0),
            delay: AtomicU32::new(0),
        })
    }

    /// Simulate a crash of `endpoint`: every message from or to it is dropped
    /// until [unblock](ChannelTransport::unblock).
    pub fn block(&self, endpoint: &str) {
        self.blocked.insert(endpoint.to_string(), ());
    }

    /// Undo [block](ChannelTransport::block).
    pub fn unblock(&self, endpoint: &str) {
        self.blocked.remove(endpoint);
    }

    /// Drop `rate` (0.0..=1.0) of all messages at random.
    pub fn set_loss_rate(&self, rate: f64) {
        let per_mille = (rate.clamp(0.0, 1.0) * 1000.0) as u32;
        self.loss_per_mille.store(per_mille, Ordering::Relaxed);
    }

    /// Enable or disable random delivery delay.
    pub fn set_delay(&self, enabled: bool) {
        self.delay.store(u32::from(enabled), Ordering::Relaxed);
    }

    fn should_drop(&self, src: &str, dst: &str) -> bool {
        if self.blocked.contains_key(src) || self.blocked.contains_key(dst) {
            return true;
        }
        let per_mille = self.loss_per_mille.load(Ordering::Relaxed);
        per_mille > 0 && rand::thread_rng().gen_range(0..1000) < per_mille
    }
}

#[async_trait]
impl TransportInterface for ChannelTransport {
    async fn listen(&self, endpoint: &str, callback: SharedTransportCallback) -> Result<()> {
        if self
            .callbacks
            .insert(endpoint.to_string(), callback)
            .is_some()
        {
            return Err(Error::EndpointAlreadyExists(endpoint.to_string()));
        }
        Ok(())
    }

    async fn unlisten(&self, endpoint: &str) -> Result<()> {
        self.callbacks.remove(endpoint);
        Ok(())
    }

    async fn send_to(&self, src: &str, dst: &str, bytes: Bytes) -> Result<()> {
        if self.should_drop(src, dst) {
            tracing::debug!("channel transport dropped message {} -> {}", src, dst);
            return Ok(());
        }

        let Some(callback) = self.callbacks.get(dst).map(|cb| cb.clone()) else {
            return Err(Error::EndpointNotFound(dst.to_string()));
        };

        let delay = if self.delay.load(Ordering::Relaxed) != 0 {
            Some(Duration::from_millis(
                rand::thread_rng().gen_range(0..=CHANNEL_DELAY_MAX_MS),
            ))
        } else {
            None
        };

        let src = src.to_string();
        let dst = dst.to_string();

        // Deliver on a fresh task so the receiving handler never runs on the
        // sender's stack while the sender holds locks.
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = callback.on_message(&src, &bytes).await {
                tracing::warn!("endpoint {} failed to handle message: {:?}", dst, e);
            }
        });

        Ok(())
    }
}
