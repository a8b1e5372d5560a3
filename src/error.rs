//! Provider error types.
//!
//! Every provider failure is converted into "no answer from this provider"
//! by the aggregator, so these never reach the user directly.

use thiserror::Error;

/// Errors raised by a provider client for a single query.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot connect to {url}")]
    Connect { url: String },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("event stream ended before a terminal payload")]
    StreamEnded,

    #[error("socket is not connected")]
    NotConnected,

    #[error("socket disconnected while the query was outstanding")]
    Disconnected,
}

impl ProviderError {
    /// Classify a reqwest error the same way for every call site.
    pub fn from_reqwest(err: reqwest::Error, url: &str, timeout_seconds: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                seconds: timeout_seconds,
            }
        } else if err.is_connect() {
            ProviderError::Connect {
                url: url.to_string(),
            }
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ProviderError::Http {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "provider returned HTTP 502: bad gateway");
        assert_eq!(
            ProviderError::Timeout { seconds: 5 }.to_string(),
            "request timed out after 5s"
        );
    }
}
