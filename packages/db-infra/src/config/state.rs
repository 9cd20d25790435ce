//! Desired-state files.
//!
//! ```toml
//! database = "calmou_db"
//! collections = ["usuarios", "meditacoes"]
//!
//! [[principals]]
//! username = "calmou_app"
//! credential = { env = "CALMOU_APP_PASSWORD" }
//! roles = [{ role = "readWrite", db = "calmou_db" }]
//! ```
//!
//! A role without `db` is scoped to the file's own database. Unknown keys are
//! rejected so that typos do not silently drop declarations.

use std::path::Path;

use provisioner::{
    CredentialRef, DesiredState, Principal, ProvisionError, RoleGrant, ValidationError,
};
use serde::Deserialize;

use crate::error::DbInfraError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateFile {
    database: String,
    #[serde(default)]
    principals: Vec<PrincipalEntry>,
    #[serde(default)]
    collections: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrincipalEntry {
    username: String,
    credential: CredentialRef,
    #[serde(default)]
    roles: Vec<RoleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoleEntry {
    role: String,
    db: Option<String>,
}

pub fn parse_desired_state(text: &str) -> Result<DesiredState, DbInfraError> {
    let file: StateFile = toml::from_str(text).map_err(|e| {
        ProvisionError::from(ValidationError::Source {
            message: e.to_string(),
        })
    })?;

    let mut desired = DesiredState::new(file.database);
    for entry in file.principals {
        let mut principal = Principal::new(entry.username, entry.credential);
        for role in entry.roles {
            let scope = role
                .db
                .unwrap_or_else(|| desired.database_name.clone());
            principal = principal.with_role(RoleGrant::new(role.role, scope));
        }
        desired = desired.with_principal(principal);
    }
    for name in file.collections {
        desired = desired.with_collection(name);
    }

    Ok(desired)
}

pub fn load_desired_state(path: &Path) -> Result<DesiredState, DbInfraError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        DbInfraError::config(format!(
            "failed to read desired state '{}': {e}",
            path.display()
        ))
    })?;
    parse_desired_state(&text)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CALMOU: &str = r#"
database = "calmou_db"
collections = ["usuarios", "meditacoes"]

[[principals]]
username = "calmou_app"
credential = { env = "CALMOU_APP_PASSWORD" }
roles = [{ role = "readWrite", db = "calmou_db" }]
"#;

    #[test]
    fn parses_the_bootstrap_declaration() {
        let desired = parse_desired_state(CALMOU).unwrap();
        assert_eq!(desired.database_name, "calmou_db");
        assert_eq!(desired.collections, vec!["usuarios", "meditacoes"]);
        assert_eq!(desired.principals.len(), 1);

        let app = &desired.principals[0];
        assert_eq!(app.username, "calmou_app");
        assert_eq!(
            app.credential,
            CredentialRef::Env("CALMOU_APP_PASSWORD".into())
        );
        assert!(app.roles.contains(&RoleGrant::new("readWrite", "calmou_db")));
        desired.validate().unwrap();
    }

    #[test]
    fn role_scope_defaults_to_own_database() {
        let desired = parse_desired_state(
            r#"
database = "calmou_db"

[[principals]]
username = "reporting"
credential = { file = "/run/secrets/reporting" }
roles = [{ role = "read" }, { role = "read", db = "analytics" }]
"#,
        )
        .unwrap();

        let roles: Vec<_> = desired.principals[0].roles.iter().cloned().collect();
        assert_eq!(
            roles,
            vec![
                RoleGrant::new("read", "analytics"),
                RoleGrant::new("read", "calmou_db"),
            ]
        );
        assert!(desired.collections.is_empty());
    }

    #[test]
    fn literal_passwords_are_not_accepted() {
        let err = parse_desired_state(
            r#"
database = "calmou_db"

[[principals]]
username = "calmou_app"
pwd = "calmou_app_2024"
credential = { env = "X" }
"#,
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("pwd"));
    }

    #[test]
    fn missing_database_is_a_validation_error() {
        let err = parse_desired_state("collections = [\"usuarios\"]").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CALMOU.as_bytes()).unwrap();

        let desired = load_desired_state(file.path()).unwrap();
        assert_eq!(desired.database_name, "calmou_db");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_desired_state(Path::new("/nonexistent/provision.toml")).unwrap_err();
        assert!(matches!(err, DbInfraError::Config { .. }));
    }
}
