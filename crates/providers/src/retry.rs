//! Transient-error retry policy for HTTP adapters.
//!
//! Rate limits, 5xx responses, and network failures are retried with
//! exponential backoff plus jitter, honoring a `Retry-After` hint.
//! Oversized payloads are not retriable.

use std::time::Duration;

use rand::Rng;

/// Attempts per request, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub fn is_payload_too_large(status: u16) -> bool {
    status == 413
}

/// Delay before retry number `attempt` (0-based). A server-provided
/// `Retry-After` wins over the computed backoff.
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(hint) = retry_after {
        return hint;
    }
    let base = 500u64.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base + jitter)
}

/// Parse a `Retry-After` header value (delta-seconds form).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(401));
        assert!(!is_transient_status(413));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_delay(0, None);
        let third = backoff_delay(2, None);
        assert!(first >= Duration::from_millis(500));
        assert!(first < Duration::from_millis(750));
        assert!(third >= Duration::from_millis(2000));
    }

    #[test]
    fn retry_after_hint_wins() {
        let d = backoff_delay(0, Some(Duration::from_secs(7)));
        assert_eq!(d, Duration::from_secs(7));
    }

    #[test]
    fn parses_delta_seconds() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("soon"), None);
    }
}
