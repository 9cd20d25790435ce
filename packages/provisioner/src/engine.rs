use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::RoleGrant;
use crate::secret::Secret;

/// A principal as the engine currently stores it.
/// Credential material is never read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPrincipal {
    pub username: String,
    pub roles: BTreeSet<RoleGrant>,
}

/// Capability set the provisioner needs from a target engine.
///
/// Implementations are exclusively borrowed for one reconciliation run and
/// must not assume any call ordering beyond what `reconcile` documents.
#[async_trait]
pub trait EngineConnection: Send {
    /// Whether the named database currently exists on the engine.
    async fn database_exists(&mut self, database: &str) -> Result<bool, EngineError>;

    /// Look up a principal in the database's authentication namespace.
    async fn find_principal(
        &mut self,
        database: &str,
        username: &str,
    ) -> Result<Option<ExistingPrincipal>, EngineError>;

    async fn create_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: &Secret,
        roles: &BTreeSet<RoleGrant>,
    ) -> Result<(), EngineError>;

    /// Replace the principal's role grants, and its credential when `secret` is given.
    async fn update_principal(
        &mut self,
        database: &str,
        username: &str,
        secret: Option<&Secret>,
        roles: &BTreeSet<RoleGrant>,
    ) -> Result<(), EngineError>;

    async fn collection_exists(&mut self, database: &str, name: &str)
        -> Result<bool, EngineError>;

    /// Create an empty collection with no validators or indexes.
    async fn create_collection(&mut self, database: &str, name: &str) -> Result<(), EngineError>;
}
