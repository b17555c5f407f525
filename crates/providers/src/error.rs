//! Error taxonomy for upstream calls.
//!
//! The session controller matches on these to pick the user-facing message,
//! so transport failures collapse into a small fixed set of categories.

use thiserror::Error;

/// How many error-body characters are surfaced to the consumer.
pub const ERROR_BODY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Connection timeout. Please check your network.")]
    Timeout,
    #[error("Network disconnected. Please check your connection.")]
    Disconnected,
    #[error("Connection refused by server.")]
    Refused,
    #[error("DNS Error: Could not resolve hostname.")]
    Dns,
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("API key not found. Please set it in settings.")]
    MissingKey,
    #[error("Search provider error: {0}")]
    Search(String),
}

impl ProviderError {
    /// Collapse a transport-level failure into one of the fixed categories.
    ///
    /// `is_connect` covers both refused sockets and failed name resolution,
    /// so the source chain is inspected to tell the two apart.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            if chain_indicates_dns(&err) {
                ProviderError::Dns
            } else {
                ProviderError::Refused
            }
        } else if err.is_body() || err.is_decode() {
            ProviderError::Disconnected
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    /// Build an `Api` error from a non-200 response, truncating the body.
    pub fn from_status(status: u16, body: &str) -> Self {
        ProviderError::Api {
            status,
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        }
    }
}

/// Whether any cause in the error chain looks like a name-resolution
/// failure. The hyper connector reports these as "dns error"; the OS
/// resolver surfaces "failed to lookup address information".
fn chain_indicates_dns(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    /// A connect-style error wrapping a deeper cause, mirroring the
    /// reqwest -> hyper -> io nesting seen on real transport failures.
    #[derive(Debug)]
    struct ConnectFailure {
        cause: std::io::Error,
    }

    impl fmt::Display for ConnectFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "error trying to connect")
        }
    }

    impl std::error::Error for ConnectFailure {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.cause)
        }
    }

    #[test]
    fn test_api_error_body_is_truncated() {
        let long = "x".repeat(ERROR_BODY_LIMIT * 2);
        match ProviderError::from_status(500, &long) {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_messages_are_user_facing() {
        assert!(ProviderError::Timeout.to_string().contains("timeout"));
        assert!(ProviderError::MissingKey.to_string().contains("API key"));
        assert_eq!(
            ProviderError::Dns.to_string(),
            "DNS Error: Could not resolve hostname."
        );
    }

    #[test]
    fn test_dns_failure_detected_in_source_chain() {
        let dns = ConnectFailure {
            cause: std::io::Error::new(
                std::io::ErrorKind::Other,
                "dns error: failed to lookup address information: Name or service not known",
            ),
        };
        assert!(chain_indicates_dns(&dns));
    }

    #[test]
    fn test_refused_chain_is_not_dns() {
        let refused = ConnectFailure {
            cause: std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Connection refused (os error 111)",
            ),
        };
        assert!(!chain_indicates_dns(&refused));
    }
}
