use std::fmt;
use thiserror::Error;

/// Registry operations that run under a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    AwaitConfirmation,
    Heartbeat,
    UpdateStatus,
    Unregister,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Register => "register",
            Operation::AwaitConfirmation => "await confirmation",
            Operation::Heartbeat => "heartbeat",
            Operation::UpdateStatus => "update status",
            Operation::Unregister => "unregister",
        };
        f.write_str(name)
    }
}

/// A single failed call against a registry endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("registry responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid registry response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            body: body.into(),
        }
    }

    /// The registry answered 404 for the requested instance or lease.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }

    /// The endpoint could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RemoteError::Connect(_)
                | RemoteError::Timeout(_)
                | RemoteError::Tls(_)
                | RemoteError::Dns(_)
        )
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let message = error_chain(&err);
        let lowered = message.to_lowercase();

        if err.is_timeout() {
            RemoteError::Timeout(message)
        } else if lowered.contains("dns") || lowered.contains("failed to lookup address") {
            RemoteError::Dns(message)
        } else if lowered.contains("certificate")
            || lowered.contains("handshake")
            || lowered.contains("tls")
        {
            RemoteError::Tls(message)
        } else if err.is_connect() || err.is_request() {
            RemoteError::Connect(message)
        } else if let Some(status) = err.status() {
            RemoteError::status(status.as_u16(), message)
        } else {
            RemoteError::Decode(message)
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("instance {0} has no version to compare")]
    MissingVersion(String),

    #[error("{operation} failed after {attempts} attempt(s)")]
    Exhausted {
        operation: Operation,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("{operation} rejected by registry")]
    Rejected {
        operation: Operation,
        #[source]
        source: RemoteError,
    },

    #[error("registry error: {0}")]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// The remote failure underneath a retried operation, if any.
    pub fn remote_cause(&self) -> Option<&RemoteError> {
        match self {
            RegistryError::Exhausted { source, .. } | RegistryError::Rejected { source, .. } => {
                Some(source)
            }
            RegistryError::Remote(source) => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(RemoteError::status(404, "gone").is_not_found());
        assert!(!RemoteError::status(500, "boom").is_not_found());
        assert!(!RemoteError::Timeout("slow".into()).is_not_found());
    }

    #[test]
    fn test_exhausted_message_names_operation() {
        let err = RegistryError::Exhausted {
            operation: Operation::UpdateStatus,
            attempts: 3,
            source: RemoteError::Connect("refused".into()),
        };
        assert_eq!(err.to_string(), "update status failed after 3 attempt(s)");
        assert_eq!(
            err.remote_cause(),
            Some(&RemoteError::Connect("refused".into()))
        );
    }
}
