//! Failure classification for retry decisions.
//!
//! Remote failures carry no structured codes, only text. Classification
//! matches the lowercased message against an ordered indicator table and is a
//! pure function so it can be tested without any network in the loop.

use serde::{Deserialize, Serialize};

/// Classification of a remote-call failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Temporary, retry with backoff
    Transient,
    /// Will never succeed, do not retry
    Permanent,
    /// Remote limit hit, retry with extra delay
    RateLimit,
    /// Connectivity problem, retry
    Network,
    /// Credential problem, do not retry
    Authentication,
}

impl ErrorKind {
    /// Whether the retry loop should attempt this failure again
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent | ErrorKind::Authentication)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "auth",
        };
        write!(f, "{s}")
    }
}

/// Ordered indicator table. Earlier rows win: "invalid_signature" must map to
/// Permanent even though "signature" alone would read as an auth problem.
const INDICATORS: &[(&[&str], ErrorKind)] = &[
    (
        &[
            "invalid_signature",
            "invalid_api_key",
            "insufficient_funds",
            "invalid_symbol",
            "order_not_found",
            "unauthorized",
            "forbidden",
        ],
        ErrorKind::Permanent,
    ),
    (
        &["rate_limit_exceeded", "too_many_requests", "429"],
        ErrorKind::RateLimit,
    ),
    (&["auth", "signature", "key"], ErrorKind::Authentication),
    (
        &["timeout", "connection", "network", "dns"],
        ErrorKind::Network,
    ),
];

/// Classify a failure by its textual message. Unmatched messages are
/// Transient, the retryable default.
pub fn classify(message: &str) -> ErrorKind {
    let message = message.to_lowercase();

    for (patterns, kind) in INDICATORS {
        if patterns.iter().any(|p| message.contains(p)) {
            return *kind;
        }
    }

    ErrorKind::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_indicators() {
        assert_eq!(classify("Order rejected: insufficient_funds"), ErrorKind::Permanent);
        assert_eq!(classify("invalid_signature in payload"), ErrorKind::Permanent);
        assert_eq!(classify("invalid_symbol: DOGE2"), ErrorKind::Permanent);
        assert_eq!(classify("403 Forbidden"), ErrorKind::Permanent);
        assert_eq!(classify("order_not_found"), ErrorKind::Permanent);
    }

    #[test]
    fn test_rate_limit_indicators() {
        assert_eq!(classify("HTTP 429"), ErrorKind::RateLimit);
        assert_eq!(classify("too_many_requests, slow down"), ErrorKind::RateLimit);
        assert_eq!(classify("rate_limit_exceeded"), ErrorKind::RateLimit);
    }

    #[test]
    fn test_auth_indicators() {
        assert_eq!(classify("auth failed"), ErrorKind::Authentication);
        assert_eq!(classify("bad signature"), ErrorKind::Authentication);
        assert_eq!(classify("expired api key"), ErrorKind::Authentication);
    }

    #[test]
    fn test_network_indicators() {
        assert_eq!(classify("request timeout after 30s"), ErrorKind::Network);
        assert_eq!(classify("connection reset by peer"), ErrorKind::Network);
        assert_eq!(classify("dns lookup failed"), ErrorKind::Network);
    }

    #[test]
    fn test_unmatched_defaults_to_transient() {
        assert_eq!(classify("internal server error"), ErrorKind::Transient);
        assert_eq!(classify(""), ErrorKind::Transient);
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert_eq!(classify("INSUFFICIENT_FUNDS"), ErrorKind::Permanent);
        assert_eq!(classify("Connection Refused"), ErrorKind::Network);
    }

    #[test]
    fn test_table_order_wins_over_later_rows() {
        // Contains both a permanent indicator and the "signature" auth term;
        // the permanent row is evaluated first.
        assert_eq!(classify("invalid_signature"), ErrorKind::Permanent);
        // Contains "key" (auth) and nothing earlier
        assert_eq!(classify("api key rotated"), ErrorKind::Authentication);
    }

    #[test]
    fn test_retryability() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Network.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
    }
}
