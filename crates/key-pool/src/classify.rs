//! Rate-limit detection for generative-service errors
//!
//! Decides whether a failed call is a quota/rate-limit signal (cool the key
//! down, retry elsewhere) or fatal (surface it). For rate limits the error
//! text is scanned for a "retry in <n>s" hint to size the wait.

use std::sync::LazyLock;
use std::time::Duration;

use provider::{ErrorClassification, UpstreamError};
use regex::Regex;

/// HTTP status for "too many requests".
const TOO_MANY_REQUESTS: u16 = 429;

/// Error text fragments that mean the key ran out of quota or request rate.
/// Matched case-insensitively.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "429",
    "too many requests",
    "resource_exhausted",
    "resource exhausted",
    "resource has been exhausted",
    "quota",
    "rate limit",
    "rate-limit",
];

/// Wait used when the error text carries no retry hint.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(20);

/// Added on top of the server's hint so the retry lands after the window.
const SAFETY_BUFFER_SECS: f64 = 1.0;

static RETRY_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)retry in\s+([0-9]+(?:\.[0-9]+)?)\s*s")
        .expect("retry hint pattern is valid")
});

/// Classify an upstream error as rate-limited or fatal.
pub fn classify(error: &UpstreamError) -> ErrorClassification {
    if error.status == Some(TOO_MANY_REQUESTS) || mentions_rate_limit(&error.message) {
        ErrorClassification::RateLimited {
            wait: suggested_wait(&error.message),
        }
    } else {
        ErrorClassification::Fatal
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Wait suggested by a "retry in <n>s" hint plus one second, or the default.
///
/// A hint too large to represent as a `Duration` counts as no hint.
pub fn suggested_wait(message: &str) -> Duration {
    RETRY_HINT
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|secs| secs + SAFETY_BUFFER_SECS)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited(wait_secs: f64) -> ErrorClassification {
        ErrorClassification::RateLimited {
            wait: Duration::from_secs_f64(wait_secs),
        }
    }

    #[test]
    fn status_429_is_rate_limited() {
        let err = UpstreamError::with_status(429, "slow down");
        assert_eq!(classify(&err), rate_limited(20.0));
    }

    #[test]
    fn resource_exhausted_text_is_rate_limited() {
        let err = UpstreamError::message("429 RESOURCE_EXHAUSTED. Resource has been exhausted");
        assert_eq!(classify(&err), rate_limited(20.0));
    }

    #[test]
    fn quota_text_case_insensitive() {
        let err = UpstreamError::message("You exceeded your current QUOTA, check your plan");
        assert_eq!(classify(&err), rate_limited(20.0));
    }

    #[test]
    fn retry_hint_adds_one_second() {
        let err = UpstreamError::with_status(
            429,
            "Quota exceeded for metric generate_content. Please retry in 37.5s.",
        );
        assert_eq!(classify(&err), rate_limited(38.5));
    }

    #[test]
    fn retry_hint_integer_seconds() {
        assert_eq!(
            suggested_wait("Please Retry in 12s"),
            Duration::from_secs(13)
        );
    }

    #[test]
    fn retry_hint_absent_uses_default() {
        assert_eq!(
            suggested_wait("rate limit exceeded"),
            DEFAULT_RATE_LIMIT_WAIT
        );
        assert_eq!(suggested_wait(""), DEFAULT_RATE_LIMIT_WAIT);
    }

    #[test]
    fn oversized_retry_hint_uses_default() {
        let err = UpstreamError::with_status(
            429,
            "Quota exceeded. Please retry in 99999999999999999999999s.",
        );
        assert_eq!(classify(&err), rate_limited(20.0));
    }

    #[test]
    fn auth_failure_is_fatal() {
        let err =
            UpstreamError::with_status(401, "API key not valid. Please pass a valid API key.");
        assert_eq!(classify(&err), ErrorClassification::Fatal);
    }

    #[test]
    fn malformed_request_is_fatal() {
        let err = UpstreamError::with_status(400, "Invalid JSON payload received");
        assert_eq!(classify(&err), ErrorClassification::Fatal);
    }

    #[test]
    fn unknown_error_without_status_is_fatal() {
        let err = UpstreamError::message("connection reset by peer");
        assert_eq!(classify(&err), ErrorClassification::Fatal);
    }

    #[test]
    fn retry_hint_alone_is_not_a_rate_limit() {
        let err = UpstreamError::with_status(503, "backend unavailable, retry in 5s");
        assert_eq!(classify(&err), ErrorClassification::Fatal);
    }
}
