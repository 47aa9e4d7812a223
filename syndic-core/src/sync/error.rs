//! Fetch error taxonomy.

use thiserror::Error;

/// Errors from one conditional fetch of a resource.
///
/// Only [`FetchError::UnknownResource`] is terminal for a resource; every
/// other kind is retried on the next scheduled cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network, DNS or timeout failure; no HTTP response was received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The Producer rejected the access key (403).
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The Producer does not know the resource (400 `bad_resource`).
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// Any other non-2xx response.
    #[error("Server returned status {status}: {body}")]
    Server { status: u16, body: String },

    /// A 200 response whose body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Returns true if the resource must never be fetched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::UnknownResource(_))
    }

    /// HTTP status to record for this error (0 for transport failures).
    pub fn status(&self) -> u16 {
        match self {
            FetchError::Transport(_) => 0,
            FetchError::Authorization(_) => 403,
            FetchError::UnknownResource(_) => 400,
            FetchError::Server { status, .. } => *status,
            FetchError::Parse(_) => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unknown_resource_is_terminal() {
        assert!(FetchError::UnknownResource("events".into()).is_terminal());
        assert!(!FetchError::Transport("timeout".into()).is_terminal());
        assert!(!FetchError::Authorization("bad key".into()).is_terminal());
        assert!(!FetchError::Server {
            status: 404,
            body: String::new()
        }
        .is_terminal());
        assert!(!FetchError::Parse("eof".into()).is_terminal());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(FetchError::Transport("x".into()).status(), 0);
        assert_eq!(FetchError::Authorization("x".into()).status(), 403);
        assert_eq!(
            FetchError::Server {
                status: 502,
                body: "bad gateway".into()
            }
            .status(),
            502
        );
    }
}
