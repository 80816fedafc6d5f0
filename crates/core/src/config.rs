//! Runtime configuration for the ring protocol.
//!
//! All tunables are carried in an explicit [DdllConfig] threaded through
//! constructors, so independent nodes (and parallel tests) can run with
//! different settings in one process.

use std::time::Duration;

use crate::consts;

/// Join-retry strategy applied when a `SetR` is answered with `SetRNak`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetRNakMode {
    /// Ignore the hint; back off per [RetryMode] and retry the same pair.
    None,
    /// Always retry immediately with the hinted `(pred, succ)` pair.
    Opt1,
    /// Retry with the hint only when the hinted predecessor is the one just
    /// tried (the requester is still adjacent); otherwise give up and let the
    /// caller re-search.
    Opt2,
}

/// Backoff applied before a retry when no usable hint is available.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry immediately.
    Immed,
    /// Wait a constant delay.
    Const,
    /// Wait a random delay, bounding retry storms between racing nodes.
    Random,
}

/// Process-independent configuration of one node / peer.
#[derive(Clone, Debug)]
pub struct DdllConfig {
    /// Capacity of the left-neighbor set.
    pub neighbor_set_size: usize,
    /// Expected upper bound on a request/ack round trip.
    pub ack_timeout_thres: Duration,
    /// Ack timer duration. Should sit slightly above `ack_timeout_thres`.
    pub ack_timeout_timer: Duration,
    /// Liveness probe period. [Duration::ZERO] disables probing.
    pub ping_period: Duration,
    /// Join-retry strategy on `SetRNak`.
    pub setrnak_mode: SetRNakMode,
    /// Backoff mode when retrying without a hint.
    pub retry_mode: RetryMode,
    /// Retry budget for join/leave.
    pub retry_count: usize,
    /// Base delay for retry backoff.
    pub retry_delay: Duration,
    /// Retransmissions before a request is reported timed out.
    pub max_retransmit: usize,
    /// Consecutive timeouts before an endpoint counts as possibly failed.
    pub failure_strikes: u32,
    /// Rounds one repair invocation retries before giving up.
    pub fix_retry_max: usize,
}

impl Default for DdllConfig {
    fn default() -> Self {
        Self {
            neighbor_set_size: consts::DEFAULT_NEIGHBOR_SET_SIZE,
            ack_timeout_thres: Duration::from_millis(consts::DEFAULT_ACK_TIMEOUT_THRES_MS),
            ack_timeout_timer: Duration::from_millis(consts::DEFAULT_ACK_TIMEOUT_TIMER_MS),
            ping_period: Duration::from_millis(consts::DEFAULT_PING_PERIOD_MS),
            setrnak_mode: SetRNakMode::Opt1,
            retry_mode: RetryMode::Random,
            retry_count: consts::NUMBER_OF_DDLL_RETRY,
            retry_delay: Duration::from_millis(consts::DEFAULT_RETRY_DELAY_MS),
            max_retransmit: consts::DEFAULT_MAX_RETRANSMIT,
            failure_strikes: consts::DEFAULT_FAILURE_STRIKES,
            fix_retry_max: consts::DEFAULT_FIX_RETRY_MAX,
        }
    }
}
