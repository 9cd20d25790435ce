//! Engine configuration and provisioning infrastructure.
//! Used by the provisioning CLI and its integration tests.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db;
pub use error::DbInfraError;
pub use infra::db::{
    build_admin_client, check_engine, orchestrate_provisioning, provision_with_lock, EngineReport,
    LockMode, RunOptions,
};
