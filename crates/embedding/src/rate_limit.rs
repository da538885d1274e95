// Token-bucket admission control for outbound embedding requests.
//
// Refill is lazy: every operation first credits `elapsed * rate` tokens,
// capped at the burst size. Waiters are granted in FIFO order; each waiter
// reserves its token up front and sleeps until the reservation matures, so
// the long-run admission rate never exceeds the configured rate.

use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::trace;

/// Configuration for the token bucket
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
  /// Steady admission rate in tokens per second
  pub rate: f64,
  /// Burst capacity in tokens
  pub burst: usize,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self { rate: 5.0, burst: 10 }
  }
}

impl RateLimitConfig {
  pub fn new(rate: f64, burst: usize) -> Self {
    Self { rate, burst }
  }
}

#[derive(Debug)]
struct BucketState {
  /// Current token balance. Negative values represent tokens already
  /// promised to queued waiters, which is what keeps grants FIFO.
  tokens: f64,
  last_refill: Instant,
}

/// Token bucket shared by all requests to a single backend instance.
#[derive(Debug)]
pub struct TokenBucket {
  config: RateLimitConfig,
  state: Mutex<BucketState>,
  reset_notify: Notify,
}

impl TokenBucket {
  pub fn new(config: RateLimitConfig) -> Self {
    let burst = config.burst as f64;
    Self {
      config,
      state: Mutex::new(BucketState {
        tokens: burst,
        last_refill: Instant::now(),
      }),
      reset_notify: Notify::new(),
    }
  }

  fn refill(&self, state: &mut BucketState) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    state.tokens = (state.tokens + elapsed * self.config.rate).min(self.config.burst as f64);
    state.last_refill = now;
  }

  /// Block until one token is available.
  ///
  /// Grant order matches call order: the reservation is taken under the
  /// (fair) mutex, and each subsequent reservation matures strictly later.
  pub async fn acquire(&self) {
    let wait = {
      let mut state = self.state.lock().await;
      self.refill(&mut state);
      state.tokens -= 1.0;
      if state.tokens >= 0.0 {
        Duration::ZERO
      } else {
        Duration::from_secs_f64(-state.tokens / self.config.rate)
      }
    };

    if wait.is_zero() {
      return;
    }

    trace!(wait_ms = wait.as_millis(), "rate limiter waiting for token");
    tokio::select! {
      _ = tokio::time::sleep(wait) => {}
      _ = self.reset_notify.notified() => {
        trace!("rate limiter reset, waiter released early");
      }
    }
  }

  /// Take a token if one is available right now, without waiting.
  pub async fn try_acquire(&self) -> bool {
    let mut state = self.state.lock().await;
    self.refill(&mut state);
    if state.tokens >= 1.0 {
      state.tokens -= 1.0;
      true
    } else {
      false
    }
  }

  /// Refill the bucket to capacity and release every queued waiter.
  pub async fn reset(&self) {
    let mut state = self.state.lock().await;
    state.tokens = self.config.burst as f64;
    state.last_refill = Instant::now();
    drop(state);
    self.reset_notify.notify_waiters();
  }

  /// Observable token balance, clamped to [0, burst].
  pub async fn available(&self) -> f64 {
    let mut state = self.state.lock().await;
    self.refill(&mut state);
    state.tokens.clamp(0.0, self.config.burst as f64)
  }
}
