//! In-process engine and secret store.
//!
//! `InMemoryEngine` follows document-store semantics: a database is listed
//! only once it holds a collection. Principals alone do not materialize it,
//! the same way user documents live outside the database they are scoped to. It counts every call and can be
//! told to fail or stall on specific objects, which is what the reconciliation
//! tests are built on.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;

use crate::engine::{EngineConnection, ExistingPrincipal};
use crate::error::EngineError;
use crate::model::{CredentialRef, RoleGrant};
use crate::secret::{Secret, SecretResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPrincipal {
    pub secret: Secret,
    pub roles: BTreeSet<RoleGrant>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    principals: HashMap<String, StoredPrincipal>,
    collections: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    databases: HashMap<String, DatabaseState>,
    calls: usize,
    failing_principals: HashMap<String, String>,
    failing_collections: HashMap<String, String>,
    stalled: HashSet<String>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of engine calls served so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Every write touching this principal is rejected with `reason`.
    pub fn fail_principal(&mut self, username: impl Into<String>, reason: impl Into<String>) {
        self.failing_principals.insert(username.into(), reason.into());
    }

    /// Creating this collection is rejected with `reason`.
    pub fn fail_collection(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.failing_collections.insert(name.into(), reason.into());
    }

    /// Lookups of this principal or collection name never complete.
    pub fn stall_on(&mut self, name: impl Into<String>) {
        self.stalled.insert(name.into());
    }

    pub fn principal(&self, database: &str, username: &str) -> Option<&StoredPrincipal> {
        self.databases.get(database)?.principals.get(username)
    }

    pub fn collections(&self, database: &str) -> Vec<String> {
        self.databases
            .get(database)
            .map(|db| db.collections.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed a principal directly, bypassing the call counter.
    pub fn insert_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: Secret,
        roles: BTreeSet<RoleGrant>,
    ) {
        self.databases
            .entry(database.to_string())
            .or_default()
            .principals
            .insert(username.to_string(), StoredPrincipal { secret, roles });
    }

    /// Seed a collection directly, bypassing the call counter.
    pub fn insert_collection(&mut self, database: &str, name: &str) {
        self.databases
            .entry(database.to_string())
            .or_default()
            .collections
            .insert(name.to_string());
    }

    async fn maybe_stall(&self, name: &str) {
        if self.stalled.contains(name) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl EngineConnection for InMemoryEngine {
    async fn database_exists(&mut self, database: &str) -> Result<bool, EngineError> {
        self.calls += 1;
        Ok(self
            .databases
            .get(database)
            .is_some_and(|db| !db.collections.is_empty()))
    }

    async fn find_principal(
        &mut self,
        database: &str,
        username: &str,
    ) -> Result<Option<ExistingPrincipal>, EngineError> {
        self.calls += 1;
        self.maybe_stall(username).await;
        Ok(self.principal(database, username).map(|p| ExistingPrincipal {
            username: username.to_string(),
            roles: p.roles.clone(),
        }))
    }

    async fn create_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: &Secret,
        roles: &BTreeSet<RoleGrant>,
    ) -> Result<(), EngineError> {
        self.calls += 1;
        if let Some(reason) = self.failing_principals.get(username) {
            return Err(EngineError::rejected(reason.clone()));
        }
        let db = self.databases.entry(database.to_string()).or_default();
        if db.principals.contains_key(username) {
            return Err(EngineError::rejected(format!(
                "User \"{username}@{database}\" already exists"
            )));
        }
        db.principals.insert(
            username.to_string(),
            StoredPrincipal {
                secret: secret.clone(),
                roles: roles.clone(),
            },
        );
        Ok(())
    }

    async fn update_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: Option<&Secret>,
        roles: &BTreeSet<RoleGrant>,
    ) -> Result<(), EngineError> {
        self.calls += 1;
        if let Some(reason) = self.failing_principals.get(username) {
            return Err(EngineError::rejected(reason.clone()));
        }
        let stored = self
            .databases
            .get_mut(database)
            .and_then(|db| db.principals.get_mut(username))
            .ok_or_else(|| EngineError::rejected(format!("User {username}@{database} not found")))?;
        if let Some(secret) = secret {
            stored.secret = secret.clone();
        }
        stored.roles = roles.clone();
        Ok(())
    }

    async fn collection_exists(&mut self, database: &str, name: &str) -> Result<bool, EngineError> {
        self.calls += 1;
        self.maybe_stall(name).await;
        Ok(self
            .databases
            .get(database)
            .is_some_and(|db| db.collections.contains(name)))
    }

    async fn create_collection(&mut self, database: &str, name: &str) -> Result<(), EngineError> {
        self.calls += 1;
        if let Some(reason) = self.failing_collections.get(name) {
            return Err(EngineError::rejected(reason.clone()));
        }
        let db = self.databases.entry(database.to_string()).or_default();
        if !db.collections.insert(name.to_string()) {
            return Err(EngineError::rejected(format!(
                "Collection {database}.{name} already exists."
            )));
        }
        Ok(())
    }
}

/// Map-backed [`SecretResolver`]; only `CredentialRef::Env` keys are looked up.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretResolver for StaticSecrets {
    fn resolve(&self, reference: &CredentialRef) -> Result<Secret, String> {
        match reference {
            CredentialRef::Env(name) => self
                .values
                .get(name)
                .map(Secret::new)
                .ok_or_else(|| format!("credential variable '{name}' is not set")),
            CredentialRef::File(path) => Err(format!(
                "file credentials are not supported here: {}",
                path.display()
            )),
        }
    }
}
