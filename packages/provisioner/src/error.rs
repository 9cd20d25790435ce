use thiserror::Error;

/// Malformed desired state. Raised before any engine contact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("database name must not be empty")]
    EmptyDatabaseName,
    #[error("principal #{index} has an empty username")]
    EmptyUsername { index: usize },
    #[error("duplicate principal username '{username}'")]
    DuplicatePrincipal { username: String },
    #[error("principal '{username}' has a role grant with an empty {field}")]
    EmptyRoleGrant {
        username: String,
        field: &'static str,
    },
    #[error("collection #{index} has an empty name")]
    EmptyCollectionName { index: usize },
    #[error("duplicate collection '{name}'")]
    DuplicateCollection { name: String },
    #[error("invalid desired state source: {message}")]
    Source { message: String },
}

/// Fatal errors for a whole reconciliation run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("connection error: {message}")]
    Connection { message: String },
}

impl ProvisionError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

/// Engine failure kinds, used to attribute a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineErrorKind {
    /// The engine could not be reached or refused the session.
    Unavailable,
    /// The engine rejected the specific operation (duplicate key, permission denied, ...).
    Rejected,
    /// The call did not complete within the configured timeout or the run deadline.
    Timeout,
    /// The run was cancelled while the call was in flight.
    Cancelled,
}

/// Error reported by an [`crate::EngineConnection`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: EngineErrorKind::Cancelled,
            message: "cancelled".to_string(),
        }
    }
}
