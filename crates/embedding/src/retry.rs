// Retrying HTTP client for embedding backends.
//
// Wraps reqwest with timeout, exponential backoff, Retry-After handling,
// response size caps and quota-exhaustion detection. Retries happen here
// and only here; callers see either a 2xx response or a classified error.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Body phrases that turn a 429 into a terminal quota failure. Providers
/// word these differently; substring matching on the lowercased body covers
/// the observed variants.
const QUOTA_PHRASES: &[&str] = &[
  "exceeded your current quota",
  "resource_exhausted",
  "daily limit",
  "monthly limit",
  "billing",
];

/// Retry policy for a single logical fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  /// Per-attempt deadline
  pub timeout: Duration,
  /// Reject responses whose Content-Length exceeds this
  pub max_response_bytes: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(30),
      timeout: Duration::from_secs(60),
      max_response_bytes: 32 * 1024 * 1024,
    }
  }
}

impl RetryPolicy {
  /// Policy for the local backend, where model load can dominate the first
  /// request: per-batch timeout in minutes, few retries.
  pub fn for_local() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(5),
      timeout: Duration::from_secs(300),
      ..Default::default()
    }
  }

  fn backoff(&self, attempt: u32) -> Duration {
    let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
  }

  /// 429 without a Retry-After header backs off from a larger base.
  fn backoff_rate_limited(&self, attempt: u32) -> Duration {
    let base = (self.base_delay.as_secs_f64() * 2.0) * 2f64.powi(attempt as i32);
    Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
  }
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request timed out after all attempts")]
  Timeout,
  #[error("non-retryable response {status}: {body}")]
  NonRetryable { status: u16, body: String },
  #[error("retries exhausted: {last}")]
  RetriesExhausted { last: String },
  #[error("response too large: {length} bytes exceeds cap of {limit}")]
  PayloadTooLarge { length: u64, limit: u64 },
  #[error("quota exhausted: {0}")]
  Quota(String),
  #[error("transport error: {0}")]
  Transport(String),
}

/// A successful (2xx) response body.
#[derive(Debug)]
pub struct FetchResponse {
  pub status: u16,
  pub body: String,
}

enum AttemptOutcome {
  Success(FetchResponse),
  Fatal(FetchError),
  Retry { delay: Duration, timed_out: bool, description: String },
}

/// HTTP client shared by the remote backends.
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new() -> Self {
    Self::default()
  }

  /// POST a JSON body, retrying per the policy. Returns the raw 2xx body
  /// for the caller to deserialize.
  pub async fn post_json<T: Serialize + ?Sized>(
    &self,
    url: &str,
    headers: &[(&str, &str)],
    body: &T,
    policy: &RetryPolicy,
  ) -> Result<FetchResponse, FetchError> {
    let mut last_description = String::new();
    let mut all_timed_out = true;

    for attempt in 0..=policy.max_retries {
      if attempt > 0 {
        trace!(attempt, url, "retrying request");
      }

      let mut request = self.client.post(url).timeout(policy.timeout).json(body);
      for (name, value) in headers {
        request = request.header(*name, *value);
      }

      match self.attempt(request, policy, attempt).await {
        AttemptOutcome::Success(response) => return Ok(response),
        AttemptOutcome::Fatal(err) => return Err(err),
        AttemptOutcome::Retry {
          delay,
          timed_out,
          description,
        } => {
          all_timed_out &= timed_out;
          last_description = description;
          if attempt < policy.max_retries {
            debug!(attempt, delay_ms = delay.as_millis(), reason = %last_description, "backing off before retry");
            tokio::time::sleep(delay).await;
          }
        }
      }
    }

    if all_timed_out {
      Err(FetchError::Timeout)
    } else {
      Err(FetchError::RetriesExhausted { last: last_description })
    }
  }

  async fn attempt(&self, request: reqwest::RequestBuilder, policy: &RetryPolicy, attempt: u32) -> AttemptOutcome {
    let response = match request.send().await {
      Ok(response) => response,
      Err(e) => {
        if e.is_timeout() {
          return AttemptOutcome::Retry {
            delay: policy.backoff(attempt),
            timed_out: true,
            description: "attempt timed out".to_string(),
          };
        }
        let message = e.to_string();
        if is_retryable_transport(&message) || e.is_connect() {
          return AttemptOutcome::Retry {
            delay: policy.backoff(attempt),
            timed_out: false,
            description: format!("transport error: {message}"),
          };
        }
        return AttemptOutcome::Fatal(FetchError::Transport(message));
      }
    };

    // Fail fast on oversized responses before reading the body
    if let Some(length) = response.content_length()
      && length > policy.max_response_bytes
    {
      return AttemptOutcome::Fatal(FetchError::PayloadTooLarge {
        length,
        limit: policy.max_response_bytes,
      });
    }

    let status = response.status();
    let retry_after = response
      .headers()
      .get(reqwest::header::RETRY_AFTER)
      .and_then(|v| v.to_str().ok())
      .and_then(parse_retry_after);

    let body = match response.text().await {
      Ok(body) => body,
      Err(e) => {
        return AttemptOutcome::Retry {
          delay: policy.backoff(attempt),
          timed_out: e.is_timeout(),
          description: format!("reading body: {e}"),
        };
      }
    };

    if status.is_success() {
      return AttemptOutcome::Success(FetchResponse {
        status: status.as_u16(),
        body,
      });
    }

    let code = status.as_u16();
    match code {
      429 => {
        if let Some(phrase) = quota_phrase(&body) {
          warn!(status = code, phrase, "quota exhaustion detected, not retrying");
          return AttemptOutcome::Fatal(FetchError::Quota(truncate(&body, 300)));
        }
        let delay = match retry_after {
          Some(hinted) => (hinted + jitter()).min(policy.max_delay),
          None => policy.backoff_rate_limited(attempt),
        };
        AttemptOutcome::Retry {
          delay,
          timed_out: false,
          description: format!("rate limited (429): {}", truncate(&body, 120)),
        }
      }
      408 => AttemptOutcome::Retry {
        delay: policy.backoff(attempt),
        timed_out: false,
        description: "request timeout (408)".to_string(),
      },
      500..=599 => AttemptOutcome::Retry {
        delay: policy.backoff(attempt),
        timed_out: false,
        description: format!("server error ({code}): {}", truncate(&body, 120)),
      },
      _ => AttemptOutcome::Fatal(FetchError::NonRetryable {
        status: code,
        body: truncate(&body, 300),
      }),
    }
  }
}

/// Transport failures worth retrying, identified by message substring the
/// way the underlying errors actually word them.
fn is_retryable_transport(message: &str) -> bool {
  let message = message.to_lowercase();
  message.contains("connection refused")
    || message.contains("connection reset")
    || message.contains("connection aborted")
    || message.contains("broken pipe")
    || message.contains("network")
    || message.contains("dns error")
}

/// Parse a Retry-After value: delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
  let value = value.trim();
  if let Ok(secs) = value.parse::<u64>() {
    return Some(Duration::from_secs(secs));
  }
  let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
  (when.with_timezone(&chrono::Utc) - chrono::Utc::now()).to_std().ok()
}

fn quota_phrase(body: &str) -> Option<&'static str> {
  let lowered = body.to_lowercase();
  QUOTA_PHRASES.iter().copied().find(|phrase| lowered.contains(phrase))
}

/// Small jitter added to Retry-After waits so synchronized clients spread
/// out. No PRNG dependency: subsecond clock noise is plenty here.
fn jitter() -> Duration {
  use std::time::{SystemTime, UNIX_EPOCH};
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .subsec_nanos();
  Duration::from_millis(u64::from(nanos % 250))
}

fn truncate(s: &str, max: usize) -> String {
  if s.len() <= max {
    s.to_string()
  } else {
    let mut end = max;
    while !s.is_char_boundary(end) {
      end -= 1;
    }
    format!("{}…", &s[..end])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_is_exponential_and_capped() {
    let policy = RetryPolicy {
      base_delay: Duration::from_millis(100),
      max_delay: Duration::from_millis(500),
      ..Default::default()
    };
    assert_eq!(policy.backoff(0), Duration::from_millis(100));
    assert_eq!(policy.backoff(1), Duration::from_millis(200));
    assert_eq!(policy.backoff(2), Duration::from_millis(400));
    assert_eq!(policy.backoff(3), Duration::from_millis(500));
  }

  #[test]
  fn test_rate_limited_backoff_uses_larger_base() {
    let policy = RetryPolicy {
      base_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(60),
      ..Default::default()
    };
    assert_eq!(policy.backoff_rate_limited(0), Duration::from_millis(200));
    assert!(policy.backoff_rate_limited(1) >= policy.backoff(1) * 2);
  }

  #[test]
  fn test_parse_retry_after_seconds() {
    assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
    assert_eq!(parse_retry_after(" 0 "), Some(Duration::from_secs(0)));
  }

  #[test]
  fn test_parse_retry_after_http_date() {
    let future = chrono::Utc::now() + chrono::Duration::seconds(30);
    let value = future.to_rfc2822();
    let parsed = parse_retry_after(&value).expect("should parse HTTP-date");
    assert!(parsed <= Duration::from_secs(31));
    assert!(parsed >= Duration::from_secs(25));
  }

  #[test]
  fn test_parse_retry_after_garbage() {
    assert_eq!(parse_retry_after("soon"), None);
  }

  #[test]
  fn test_quota_phrase_detection() {
    assert!(quota_phrase("You have exceeded your current quota, please check billing").is_some());
    assert!(quota_phrase("RESOURCE_EXHAUSTED: try later").is_some());
    assert!(quota_phrase("Daily limit reached").is_some());
    assert!(quota_phrase("slow down, too many requests").is_none());
  }

  #[test]
  fn test_retryable_transport_classification() {
    assert!(is_retryable_transport("Connection refused (os error 111)"));
    assert!(is_retryable_transport("connection reset by peer"));
    assert!(is_retryable_transport("dns error: no record"));
    assert!(!is_retryable_transport("builder error: invalid url"));
  }

  #[test]
  fn test_truncate_respects_char_boundaries() {
    let s = "héllo wörld, this is a long body";
    let t = truncate(s, 6);
    assert!(t.chars().count() <= 7);
  }
}
