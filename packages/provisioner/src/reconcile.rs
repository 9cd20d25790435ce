//! The reconciliation pass.
//!
//! `reconcile` drives one database towards a [`DesiredState`]:
//!
//! 1. observe the database (never created explicitly; engines materialize it lazily),
//! 2. principals in declaration order: create if absent, leave alone if present,
//!    rewrite roles and credential only when `force_update` is set,
//! 3. collections in declaration order: create if absent.
//!
//! Per-object failures are recorded and the pass continues. Only validation
//! and the initial database observation can fail the whole run. A run deadline
//! or cancellation fails the object in flight and every object not yet
//! started, and the partial result is still returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineConnection;
use crate::error::{EngineError, EngineErrorKind, ProvisionError};
use crate::model::{DesiredState, Principal, RoleGrant};
use crate::outcome::{DatabaseObservation, Interruption, ObjectRef, Outcome, ReconciliationResult};
use crate::secret::{EnvSecretResolver, SecretResolver};

pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounds on a whole pass, on top of the per-call timeout.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub deadline: Option<Instant>,
    pub cancellation: CancellationToken,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RunLimits {
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Deadline `budget` from now, stopped early by `cancellation`.
    pub fn within(budget: Duration, cancellation: CancellationToken) -> Self {
        Self {
            deadline: Some(Instant::now() + budget),
            cancellation,
        }
    }

    pub fn interruption(&self) -> Option<Interruption> {
        if self.cancellation.is_cancelled() {
            Some(Interruption::Cancelled)
        } else if self.deadline.is_some_and(|at| Instant::now() >= at) {
            Some(Interruption::Deadline)
        } else {
            None
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[derive(Clone)]
pub struct Provisioner {
    force_update: bool,
    op_timeout: Duration,
    secrets: Arc<dyn SecretResolver>,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner {
    pub fn new() -> Self {
        Self {
            force_update: false,
            op_timeout: DEFAULT_OP_TIMEOUT,
            secrets: Arc::new(EnvSecretResolver),
        }
    }

    /// Rewrite roles and credentials of principals that already exist.
    pub fn force_update(mut self, force: bool) -> Self {
        self.force_update = force;
        self
    }

    /// Upper bound for each individual engine call.
    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn secrets(mut self, resolver: impl SecretResolver + 'static) -> Self {
        self.secrets = Arc::new(resolver);
        self
    }

    pub async fn reconcile<C>(
        &self,
        desired: &DesiredState,
        conn: &mut C,
    ) -> Result<ReconciliationResult, ProvisionError>
    where
        C: EngineConnection + ?Sized,
    {
        self.reconcile_within(desired, conn, &RunLimits::unbounded())
            .await
    }

    /// [`Self::reconcile`] bounded by `limits`. Every declared object still
    /// gets exactly one outcome when the pass is cut short.
    pub async fn reconcile_within<C>(
        &self,
        desired: &DesiredState,
        conn: &mut C,
        limits: &RunLimits,
    ) -> Result<ReconciliationResult, ProvisionError>
    where
        C: EngineConnection + ?Sized,
    {
        desired.validate()?;

        let database = desired.database_name.as_str();
        let existed = self
            .call(limits, conn.database_exists(database))
            .await
            .map_err(|e| {
                ProvisionError::connection(format!("cannot observe database '{database}': {e}"))
            })?;

        let observation = if existed {
            DatabaseObservation::Existing
        } else {
            DatabaseObservation::Pending
        };
        info!(
            database = database,
            observation = ?observation,
            principals = desired.principals.len(),
            collections = desired.collections.len(),
            force_update = self.force_update,
            "reconcile=start"
        );

        let mut result = ReconciliationResult::new(database, observation);

        for principal in &desired.principals {
            let object = ObjectRef::principal(&principal.username);
            let outcome = match check_interruption(&mut result, limits) {
                Some(stop) => Outcome::Failed(stop.reason().to_string()),
                None => {
                    self.reconcile_principal(database, principal, conn, limits)
                        .await
                }
            };
            note_interruption(&mut result, &outcome, limits);
            log_outcome(&object, &outcome);
            result.record(object, outcome);
        }

        for name in &desired.collections {
            let object = ObjectRef::collection(name);
            let outcome = match check_interruption(&mut result, limits) {
                Some(stop) => Outcome::Failed(stop.reason().to_string()),
                None => self.reconcile_collection(database, name, conn, limits).await,
            };
            note_interruption(&mut result, &outcome, limits);
            log_outcome(&object, &outcome);
            result.record(object, outcome);
        }

        let counts = result.counts();
        info!(
            database = database,
            created = counts.created,
            already_exists = counts.already_exists,
            updated = counts.updated,
            failed = counts.failed,
            interrupted = ?result.interrupted,
            "reconcile=done"
        );

        Ok(result)
    }

    async fn reconcile_principal<C>(
        &self,
        database: &str,
        principal: &Principal,
        conn: &mut C,
        limits: &RunLimits,
    ) -> Outcome
    where
        C: EngineConnection + ?Sized,
    {
        let username = principal.username.as_str();

        let existing = match self.call(limits, conn.find_principal(database, username)).await {
            Ok(existing) => existing,
            Err(e) => return failure("lookup", e),
        };

        match existing {
            None => {
                let secret = match self.secrets.resolve(&principal.credential) {
                    Ok(secret) => secret,
                    Err(reason) => return Outcome::Failed(reason),
                };
                match self
                    .call(
                        limits,
                        conn.create_principal(database, username, &secret, &principal.roles),
                    )
                    .await
                {
                    Ok(()) => Outcome::Created,
                    Err(e) => failure("create", e),
                }
            }
            Some(current) if !self.force_update => {
                if current.roles != principal.roles {
                    warn!(
                        principal = username,
                        current = %join_roles(&current.roles),
                        desired = %join_roles(&principal.roles),
                        "role grants differ; left unchanged without force-update"
                    );
                }
                Outcome::AlreadyExists
            }
            Some(_) => {
                let secret = match self.secrets.resolve(&principal.credential) {
                    Ok(secret) => secret,
                    Err(reason) => return Outcome::Failed(reason),
                };
                match self
                    .call(
                        limits,
                        conn.update_principal(database, username, Some(&secret), &principal.roles),
                    )
                    .await
                {
                    Ok(()) => Outcome::Updated,
                    Err(e) => failure("update", e),
                }
            }
        }
    }

    async fn reconcile_collection<C>(
        &self,
        database: &str,
        name: &str,
        conn: &mut C,
        limits: &RunLimits,
    ) -> Outcome
    where
        C: EngineConnection + ?Sized,
    {
        match self.call(limits, conn.collection_exists(database, name)).await {
            Ok(true) => Outcome::AlreadyExists,
            Ok(false) => match self.call(limits, conn.create_collection(database, name)).await {
                Ok(()) => Outcome::Created,
                Err(e) => failure("create", e),
            },
            Err(e) => failure("lookup", e),
        }
    }

    /// One engine call, bounded by the per-call timeout and the run limits.
    /// A call that has already completed wins over a simultaneous interruption.
    async fn call<T, F>(&self, limits: &RunLimits, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        tokio::select! {
            biased;

            res = tokio::time::timeout(self.op_timeout, fut) => match res {
                Ok(res) => res,
                Err(_) => Err(EngineError::timeout(format!(
                    "timeout after {}ms",
                    self.op_timeout.as_millis()
                ))),
            },
            _ = limits.cancellation.cancelled() => Err(EngineError::cancelled()),
            _ = limits.expired() => Err(EngineError::timeout(Interruption::Deadline.reason())),
        }
    }
}

/// Failure reason for an engine call. Timeouts and cancellation speak for
/// themselves; other errors are prefixed with the action that failed.
fn failure(action: &str, e: EngineError) -> Outcome {
    match e.kind {
        EngineErrorKind::Timeout | EngineErrorKind::Cancelled => Outcome::Failed(e.message),
        EngineErrorKind::Unavailable => {
            Outcome::Failed(format!("{action} failed: engine unavailable: {}", e.message))
        }
        _ => Outcome::Failed(format!("{action} failed: {}", e.message)),
    }
}

/// Latches the first interruption seen between objects.
fn check_interruption(
    result: &mut ReconciliationResult,
    limits: &RunLimits,
) -> Option<Interruption> {
    if result.interrupted.is_none() {
        result.interrupted = limits.interruption();
    }
    result.interrupted
}

fn note_interruption(result: &mut ReconciliationResult, outcome: &Outcome, limits: &RunLimits) {
    if result.interrupted.is_none() && outcome.is_failed() {
        result.interrupted = limits.interruption();
    }
}

fn log_outcome(object: &ObjectRef, outcome: &Outcome) {
    match outcome {
        Outcome::Failed(reason) => warn!(object = %object, reason = %reason, "object=failed"),
        other => debug!(object = %object, outcome = %other, "object=reconciled"),
    }
}

fn join_roles<'a>(roles: impl IntoIterator<Item = &'a RoleGrant>) -> String {
    roles
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
