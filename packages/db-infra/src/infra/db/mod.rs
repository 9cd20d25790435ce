pub mod core;
pub mod diagnostics;
pub mod locking;
pub mod mongo;

pub use self::core::{
    build_admin_client, check_engine, orchestrate_provisioning, provision_with_lock,
    CollectionReport, EngineReport, LockMode, RunOptions,
};
pub use diagnostics::provision_counters;
pub use locking::{BootstrapLock, FileLock, Guard, InMemoryLock};
pub use mongo::MongoEngine;
