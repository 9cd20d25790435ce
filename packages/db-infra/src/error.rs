use provisioner::ProvisionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbInfraError {
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error("Connection error: {message}")]
    Connection { message: String },
    #[error("Lock error: {message}")]
    Lock { message: String },
    #[error("Cancelled: {message}")]
    Cancelled { message: String },
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl DbInfraError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    /// True when nothing was attempted against the engine because the input was malformed.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Provision(ProvisionError::Validation(_)))
    }
}
