//! Wire-layer errors, categorized by retryability.

/// Errors from provider adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("send request: {0}")]
    Transport(String),

    #[error("read stream: {0}")]
    Stream(String),

    #[error("marshal request: {0}")]
    Serialize(String),

    #[error("parse response: {0}")]
    Parse(String),

    #[error("no providers configured")]
    NoProviders,
}

impl LlmError {
    /// Statuses the retry policy acts on: rate limiting and transient
    /// server-side failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Api {
                status: 429 | 500 | 529,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 529] {
            assert!(
                LlmError::Api {
                    status,
                    message: String::new()
                }
                .is_retryable(),
                "{status} should be retryable"
            );
        }
        for status in [400, 401, 403, 404, 503] {
            assert!(
                !LlmError::Api {
                    status,
                    message: String::new()
                }
                .is_retryable(),
                "{status} should not be retryable"
            );
        }
        assert!(!LlmError::Transport("reset".to_string()).is_retryable());
    }
}
