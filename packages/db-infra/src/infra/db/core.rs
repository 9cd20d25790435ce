use std::future::Future;
use std::time::{Duration, Instant};

use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use provisioner::{
    DesiredState, EngineConnection, Interruption, ProvisionError, Provisioner,
    ReconciliationResult, RunLimits,
};
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::config::db::{lock_dir, lock_timeout, sanitize_db_url, EngineSettings};
use crate::error::DbInfraError;
use crate::infra::db::diagnostics::provision_counters;
use crate::infra::db::locking::{provision_lock_key, BootstrapLock, FileLock, InMemoryLock};
use crate::infra::db::mongo::MongoEngine;

pub const CONNECT_MAX_ATTEMPTS: u32 = 5;
pub const CONNECT_RETRY_INTERVAL_MS: u64 = 500;
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Host-level file lock keyed on database and engine.
    File,
    /// The caller serializes runs itself.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub force_update: bool,
    pub lock_mode: LockMode,
    pub lock_timeout: Duration,
    pub op_timeout: Duration,
    pub body_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force_update: false,
            lock_mode: LockMode::File,
            lock_timeout: Duration::from_millis(crate::config::db::DEFAULT_LOCK_TIMEOUT_MS),
            op_timeout: provisioner::DEFAULT_OP_TIMEOUT,
            body_timeout: DEFAULT_BODY_TIMEOUT,
        }
    }
}

impl RunOptions {
    /// Defaults, with the lock timeout taken from `PROVISION_LOCK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, DbInfraError> {
        Ok(Self {
            lock_timeout: lock_timeout()?,
            ..Self::default()
        })
    }

    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new()
            .force_update(self.force_update)
            .op_timeout(self.op_timeout)
    }
}

async fn retry_connection<T, F, Fut>(
    mut connect_fn: F,
    max_attempts: u32,
    interval_ms: u64,
) -> Result<T, DbInfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbInfraError>>,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match connect_fn().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        "connection_retry=success attempts={} interval_ms={}",
                        attempt, interval_ms
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < max_attempts {
                    provision_counters::connect_retry();
                    warn!(
                        "connection_retry=failed attempt={} max_attempts={} interval_ms={}",
                        attempt, max_attempts, interval_ms
                    );
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| DbInfraError::connection("no connection attempt was made")))
}

/// Build the admin client and make sure the engine answers a `ping`.
pub async fn build_admin_client(settings: &EngineSettings) -> Result<Client, DbInfraError> {
    settings.validate()?;

    let url = settings.make_conn_spec();
    let sanitized = sanitize_db_url(&url);

    let mut options = ClientOptions::parse(&url).await.map_err(|e| {
        DbInfraError::config(format!("invalid connection string {sanitized}: {e}"))
    })?;
    options.app_name = Some("provision".to_string());
    options.connect_timeout = Some(settings.connect_timeout);
    options.server_selection_timeout = Some(settings.server_selection_timeout);

    let client = Client::with_options(options)
        .map_err(|e| DbInfraError::config(format!("failed to build client for {sanitized}: {e}")))?;

    retry_connection(
        || {
            let client = client.clone();
            let sanitized = sanitized.clone();
            async move {
                client
                    .database("admin")
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        DbInfraError::connection(format!("failed to reach {sanitized}: {e}"))
                    })
            }
        },
        CONNECT_MAX_ATTEMPTS,
        CONNECT_RETRY_INTERVAL_MS,
    )
    .await?;

    info!(engine = %sanitized, "connect=ok");
    Ok(client)
}

/// Validate, connect, lock, reconcile, release.
///
/// Validation happens before any network contact. A connection failure is
/// returned as the run's error; per-object failures are inside the result.
pub async fn orchestrate_provisioning(
    settings: &EngineSettings,
    desired: &DesiredState,
    options: &RunOptions,
    cancellation_token: CancellationToken,
) -> Result<ReconciliationResult, DbInfraError> {
    desired.validate().map_err(ProvisionError::from)?;

    let client = build_admin_client(settings).await?;
    let mut engine = MongoEngine::new(client);

    let sanitized_url = sanitize_db_url(&settings.make_conn_spec());
    let key = provision_lock_key(&desired.database_name, &sanitized_url);

    info!(
        "provision=start database={} engine={} lock={:?}",
        desired.database_name, sanitized_url, options.lock_mode
    );

    let result = match options.lock_mode {
        LockMode::File => {
            let lock = FileLock::for_key(&lock_dir(), &key);
            provision_with_lock(&mut engine, lock, desired, options, cancellation_token).await
        }
        LockMode::Disabled => {
            provision_with_lock(&mut engine, InMemoryLock, desired, options, cancellation_token)
                .await
        }
    };

    provision_counters::log_snapshot("provision_orchestration");
    result
}

/// Acquire `lock` with backoff, then run one reconciliation under the body
/// timeout. The lock is released on every path.
///
/// Cancellation while waiting for the lock is an error since nothing was
/// attempted. Once reconciliation starts, a body timeout or cancellation
/// yields the partial result with unfinished objects `Failed`.
pub async fn provision_with_lock<C, L>(
    conn: &mut C,
    mut lock: L,
    desired: &DesiredState,
    options: &RunOptions,
    cancellation_token: CancellationToken,
) -> Result<ReconciliationResult, DbInfraError>
where
    C: EngineConnection + ?Sized,
    L: BootstrapLock,
{
    let start = Instant::now();

    let mut attempts: u32 = 0;
    let guard = loop {
        attempts += 1;

        if let Some(acquired_guard) = lock.try_acquire().await? {
            provision_counters::add_lock_acquire_attempts(attempts as usize);
            provision_counters::lock_acquired();
            trace!(
                lock = "won",
                database = %desired.database_name,
                attempts = attempts,
                elapsed_ms = start.elapsed().as_millis()
            );
            break acquired_guard;
        }

        let base_delay_ms = (5u64 << attempts.saturating_sub(1).min(16)).min(80);
        let jitter_ms = rand::rng().random::<u64>() % 4;
        let delay_ms = base_delay_ms + jitter_ms;

        trace!(
            lock = "backoff",
            attempts = attempts,
            delay_ms = delay_ms,
            elapsed_ms = start.elapsed().as_millis()
        );
        provision_counters::lock_backoff_event();

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                if start.elapsed() >= options.lock_timeout {
                    provision_counters::lock_acquire_timeout();
                    return Err(DbInfraError::lock(format!(
                        "bootstrap lock acquisition timeout after {:?} ({} attempts); another provisioning run holds it",
                        start.elapsed(), attempts
                    )));
                }
            }
            _ = cancellation_token.cancelled() => {
                info!(
                    elapsed_ms = start.elapsed().as_millis(),
                    attempts = attempts,
                    "Provisioning cancelled during lock backoff"
                );
                provision_counters::run_cancelled();
                return Err(DbInfraError::Cancelled {
                    message: format!(
                        "provisioning cancelled during lock backoff after {}ms",
                        start.elapsed().as_millis()
                    ),
                });
            }
        }
    };

    let body_start = Instant::now();
    let provisioner = options.provisioner();
    let limits = RunLimits::within(options.body_timeout, cancellation_token);

    let outcome = provisioner
        .reconcile_within(desired, conn, &limits)
        .await
        .map_err(DbInfraError::from);

    if let Err(release_err) = guard.release().await {
        warn!(error = %release_err, "Failed to release bootstrap lock");
    }

    let result = outcome?;
    let counts = result.counts();
    match result.interrupted {
        Some(Interruption::Deadline) => {
            provision_counters::body_timeout();
            warn!(
                body_timeout_ms = options.body_timeout.as_millis(),
                failed = counts.failed,
                "provisioning body timed out; unfinished objects recorded as failed"
            );
        }
        Some(Interruption::Cancelled) => {
            provision_counters::run_cancelled();
            info!(
                elapsed_ms = body_start.elapsed().as_millis(),
                failed = counts.failed,
                "Provisioning cancelled during reconciliation"
            );
        }
        None => provision_counters::run_completed(),
    }
    provision_counters::add_objects_failed(counts.failed);
    info!(
        provision = "done",
        database = %result.database_name,
        elapsed_ms = body_start.elapsed().as_millis(),
        created = counts.created,
        already_exists = counts.already_exists,
        updated = counts.updated,
        failed = counts.failed
    );

    Ok(result)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub name: String,
    pub documents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    pub engine: String,
    pub database: String,
    pub exists: bool,
    pub collections: Vec<CollectionReport>,
}

/// Connectivity check plus collection inventory for `database`. Read-only.
pub async fn check_engine(
    settings: &EngineSettings,
    database: &str,
) -> Result<EngineReport, DbInfraError> {
    let client = build_admin_client(settings).await?;
    let to_conn_err =
        |e: mongodb::error::Error| DbInfraError::connection(format!("engine check failed: {e}"));

    let exists = client
        .list_database_names()
        .filter(doc! { "name": database })
        .await
        .map_err(to_conn_err)?
        .iter()
        .any(|n| n == database);

    let db = client.database(database);
    let mut names = db.list_collection_names().await.map_err(to_conn_err)?;
    names.sort();

    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let documents = db
            .collection::<Document>(&name)
            .estimated_document_count()
            .await
            .map_err(to_conn_err)?;
        collections.push(CollectionReport { name, documents });
    }

    Ok(EngineReport {
        engine: sanitize_db_url(&settings.make_conn_spec()),
        database: database.to_string(),
        exists,
        collections,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = retry_connection(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(DbInfraError::connection("connection refused"))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            1,
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let err = retry_connection(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(DbInfraError::connection(format!("attempt {n}"))) }
            },
            3,
            1,
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[test]
    fn run_options_default_to_file_lock_and_no_force() {
        let options = RunOptions::default();
        assert_eq!(options.lock_mode, LockMode::File);
        assert!(!options.force_update);
        assert_eq!(options.lock_timeout, Duration::from_millis(3000));
        assert_eq!(options.body_timeout, DEFAULT_BODY_TIMEOUT);
    }
}
