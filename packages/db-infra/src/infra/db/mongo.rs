use std::collections::BTreeSet;

use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::Client;
use provisioner::{EngineConnection, EngineError, ExistingPrincipal, RoleGrant, Secret};
use serde::Deserialize;
use tracing::trace;

/// [`EngineConnection`] over the MongoDB driver.
///
/// Principals live in the target database's own authentication namespace
/// (`usersInfo`/`createUser`/`updateUser` are run against that database).
pub struct MongoEngine {
    client: Client,
}

impl MongoEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct UsersInfoReply {
    #[serde(default)]
    users: Vec<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    user: String,
    #[serde(default)]
    roles: Vec<RoleGrant>,
}

fn roles_doc(roles: &BTreeSet<RoleGrant>) -> Vec<Document> {
    roles
        .iter()
        .map(|g| doc! { "role": g.role_name.as_str(), "db": g.scope_database.as_str() })
        .collect()
}

/// Map a driver error onto the engine error taxonomy, keeping the server code.
pub fn map_mongo_err(e: MongoError) -> EngineError {
    match e.kind.as_ref() {
        ErrorKind::Command(cmd) => EngineError::rejected(format!(
            "code {} ({}): {}",
            cmd.code, cmd.code_name, cmd.message
        )),
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::Authentication { .. } => {
            EngineError::unavailable(e.to_string())
        }
        _ => EngineError::rejected(e.to_string()),
    }
}

#[async_trait]
impl EngineConnection for MongoEngine {
    async fn database_exists(&mut self, database: &str) -> Result<bool, EngineError> {
        let names = self
            .client
            .list_database_names()
            .filter(doc! { "name": database })
            .await
            .map_err(map_mongo_err)?;
        Ok(names.iter().any(|n| n == database))
    }

    async fn find_principal(
        &mut self,
        database: &str,
        username: &str,
    ) -> Result<Option<ExistingPrincipal>, EngineError> {
        let reply = self
            .client
            .database(database)
            .run_command(doc! { "usersInfo": { "user": username, "db": database } })
            .await
            .map_err(map_mongo_err)?;

        let parsed: UsersInfoReply = bson::from_document(reply)
            .map_err(|e| EngineError::rejected(format!("unexpected usersInfo reply: {e}")))?;
        trace!(principal = username, matches = parsed.users.len(), "usersInfo");

        Ok(parsed
            .users
            .into_iter()
            .find(|u| u.user == username)
            .map(|u| ExistingPrincipal {
                username: u.user,
                roles: u.roles.into_iter().collect(),
            }))
    }

    async fn create_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: &Secret,
        roles: &BTreeSet<RoleGrant>,
    ) -> Result<(), EngineError> {
        self.client
            .database(database)
            .run_command(doc! {
                "createUser": username,
                "pwd": secret.expose(),
                "roles": roles_doc(roles),
            })
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn update_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: Option<&Secret>,
        roles: &BTreeSet<RoleGrant>,
    ) -> Result<(), EngineError> {
        let mut command = doc! {
            "updateUser": username,
            "roles": roles_doc(roles),
        };
        if let Some(secret) = secret {
            command.insert("pwd", secret.expose());
        }

        self.client
            .database(database)
            .run_command(command)
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn collection_exists(&mut self, database: &str, name: &str) -> Result<bool, EngineError> {
        let names = self
            .client
            .database(database)
            .list_collection_names()
            .filter(doc! { "name": name })
            .await
            .map_err(map_mongo_err)?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn create_collection(&mut self, database: &str, name: &str) -> Result<(), EngineError> {
        self.client
            .database(database)
            .create_collection(name)
            .await
            .map_err(map_mongo_err)
    }
}
