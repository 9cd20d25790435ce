//! Desired-state descriptor handed to the provisioner.
//!
//! A [`DesiredState`] is a flat description of one database: the principals
//! that must be able to authenticate against it and the collections that must
//! exist in it. It carries no secrets, only [`CredentialRef`]s.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A role granted to a principal, scoped to a database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleGrant {
    #[serde(rename = "role")]
    pub role_name: String,
    #[serde(rename = "db")]
    pub scope_database: String,
}

impl RoleGrant {
    pub fn new(role_name: impl Into<String>, scope_database: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            scope_database: scope_database.into(),
        }
    }
}

impl fmt::Display for RoleGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role_name, self.scope_database)
    }
}

/// Where a principal's credential is read from. Never the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRef {
    /// Name of an environment variable holding the secret.
    Env(String),
    /// Path of a file holding the secret (trailing newline is stripped).
    File(PathBuf),
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env(name) => write!(f, "env:{name}"),
            CredentialRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub credential: CredentialRef,
    pub roles: BTreeSet<RoleGrant>,
}

impl Principal {
    pub fn new(username: impl Into<String>, credential: CredentialRef) -> Self {
        Self {
            username: username.into(),
            credential,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, grant: RoleGrant) -> Self {
        self.roles.insert(grant);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub database_name: String,
    /// Reconciled in declaration order.
    pub principals: Vec<Principal>,
    /// Unique names, reconciled in declaration order.
    pub collections: Vec<String>,
}

impl DesiredState {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            principals: Vec::new(),
            collections: Vec::new(),
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principals.push(principal);
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }

    /// Check structural invariants. Reports the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.database_name.trim().is_empty() {
            return Err(ValidationError::EmptyDatabaseName);
        }

        let mut usernames = HashSet::new();
        for (index, principal) in self.principals.iter().enumerate() {
            if principal.username.trim().is_empty() {
                return Err(ValidationError::EmptyUsername { index });
            }
            if !usernames.insert(principal.username.as_str()) {
                return Err(ValidationError::DuplicatePrincipal {
                    username: principal.username.clone(),
                });
            }
            for grant in &principal.roles {
                let field = if grant.role_name.trim().is_empty() {
                    Some("role name")
                } else if grant.scope_database.trim().is_empty() {
                    Some("scope database")
                } else {
                    None
                };
                if let Some(field) = field {
                    return Err(ValidationError::EmptyRoleGrant {
                        username: principal.username.clone(),
                        field,
                    });
                }
            }
        }

        let mut collections = HashSet::new();
        for (index, name) in self.collections.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyCollectionName { index });
            }
            if !collections.insert(name.as_str()) {
                return Err(ValidationError::DuplicateCollection { name: name.clone() });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(username: &str) -> Principal {
        Principal::new(username, CredentialRef::Env("APP_PASSWORD".into()))
            .with_role(RoleGrant::new("readWrite", "calmou_db"))
    }

    #[test]
    fn valid_state_passes() {
        let state = DesiredState::new("calmou_db")
            .with_principal(app("calmou_app"))
            .with_collection("usuarios")
            .with_collection("meditacoes");
        assert_eq!(state.validate(), Ok(()));
    }

    #[test]
    fn blank_database_name_is_rejected() {
        let state = DesiredState::new("   ");
        assert_eq!(state.validate(), Err(ValidationError::EmptyDatabaseName));
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let state = DesiredState::new("calmou_db")
            .with_principal(app("calmou_app"))
            .with_principal(app("calmou_app"));
        assert_eq!(
            state.validate(),
            Err(ValidationError::DuplicatePrincipal {
                username: "calmou_app".into()
            })
        );
    }

    #[test]
    fn empty_username_reports_index() {
        let state = DesiredState::new("calmou_db")
            .with_principal(app("calmou_app"))
            .with_principal(app(""));
        assert_eq!(
            state.validate(),
            Err(ValidationError::EmptyUsername { index: 1 })
        );
    }

    #[test]
    fn empty_role_grant_fields_are_rejected() {
        let state = DesiredState::new("calmou_db").with_principal(
            Principal::new("calmou_app", CredentialRef::Env("X".into()))
                .with_role(RoleGrant::new("readWrite", "")),
        );
        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("scope database"));
    }

    #[test]
    fn collection_names_must_be_present_and_unique() {
        let empty = DesiredState::new("calmou_db")
            .with_collection("usuarios")
            .with_collection("");
        assert_eq!(
            empty.validate(),
            Err(ValidationError::EmptyCollectionName { index: 1 })
        );

        let dup = DesiredState::new("calmou_db")
            .with_collection("usuarios")
            .with_collection("usuarios");
        assert_eq!(
            dup.validate(),
            Err(ValidationError::DuplicateCollection {
                name: "usuarios".into()
            })
        );
    }

    #[test]
    fn role_grants_are_a_set() {
        let principal = app("calmou_app").with_role(RoleGrant::new("readWrite", "calmou_db"));
        assert_eq!(principal.roles.len(), 1);
    }
}
