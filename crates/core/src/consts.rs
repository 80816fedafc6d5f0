//! Constant variables.

/// Default capacity of the left-neighbor set kept for failure recovery.
pub const DEFAULT_NEIGHBOR_SET_SIZE: usize = 4;
/// Expected upper bound on a request/ack round trip, in ms.
pub const DEFAULT_ACK_TIMEOUT_THRES_MS: u64 = 500;
/// Ack timer duration in ms. Slightly above the threshold so a round trip
/// right at the bound is not reported as a timeout.
pub const DEFAULT_ACK_TIMEOUT_TIMER_MS: u64 = 600;
/// Liveness probe period in ms. Zero disables probing.
pub const DEFAULT_PING_PERIOD_MS: u64 = 10_000;
/// Retry budget for join/leave before the operation is reported failed.
pub const NUMBER_OF_DDLL_RETRY: usize = 10;
/// Base delay in ms for retry backoff (`RetryMode::Const`; `Random` draws
/// from `0..2x` this value).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;
/// Retransmissions attempted before a request is reported timed out.
pub const DEFAULT_MAX_RETRANSMIT: usize = 3;
/// `RetransMode::Slow` stretches the ack timer by this factor.
pub const SLOW_RETRANS_FACTOR: u32 = 4;
/// Bound on the duplicate-suppression cache of recently seen request ids.
pub const SEEN_CACHE_SIZE: usize = 1024;
/// Consecutive timeouts before an endpoint counts as possibly failed.
pub const DEFAULT_FAILURE_STRIKES: u32 = 2;
/// Hop bound for the iterative closest-links search during key insertion.
pub const CLOSEST_SEARCH_MAX_HOPS: usize = 32;
/// Rounds one `check_and_fix` invocation retries before giving up; the next
/// probe tick starts over.
pub const DEFAULT_FIX_RETRY_MAX: usize = 8;
