use std::fmt;

use crate::model::CredentialRef;

/// Resolved credential material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Turns a [`CredentialRef`] into secret material.
///
/// Errors are plain messages: a resolution failure is recorded against the
/// principal that needed it and never aborts the run.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &CredentialRef) -> Result<Secret, String>;
}

/// Reads secrets from environment variables or files (e.g. mounted container secrets).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, reference: &CredentialRef) -> Result<Secret, String> {
        let value = match reference {
            CredentialRef::Env(name) => std::env::var(name)
                .map_err(|_| format!("credential variable '{name}' is not set"))?,
            CredentialRef::File(path) => std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read credential file '{}': {e}", path.display()))?
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        };

        if value.is_empty() {
            return Err(format!("credential {reference} resolved to an empty value"));
        }
        Ok(Secret(value))
    }
}
