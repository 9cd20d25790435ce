//! Declarative database provisioning.
//!
//! A [`DesiredState`] names a database, the principals that must exist in it
//! and the collections it must contain. [`Provisioner::reconcile`] drives an
//! [`EngineConnection`] towards that state and reports one [`Outcome`] per
//! declared object. Running it again against an already-provisioned engine
//! changes nothing.

pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod outcome;
pub mod reconcile;
pub mod secret;

pub use engine::{EngineConnection, ExistingPrincipal};
pub use error::{EngineError, EngineErrorKind, ProvisionError, ValidationError};
pub use model::{CredentialRef, DesiredState, Principal, RoleGrant};
pub use outcome::{
    DatabaseObservation, Interruption, ObjectKind, ObjectRef, Outcome, OutcomeCounts,
    ReconciliationResult,
};
pub use reconcile::{Provisioner, RunLimits, DEFAULT_OP_TIMEOUT};
pub use secret::{EnvSecretResolver, Secret, SecretResolver};
