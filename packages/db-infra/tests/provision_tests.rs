use std::time::Duration;

use db_infra::config::state::parse_desired_state;
use db_infra::infra::db::{BootstrapLock, FileLock, InMemoryLock};
use db_infra::{provision_with_lock, DbInfraError, LockMode, RunOptions};
use provisioner::memory::InMemoryEngine;
use provisioner::{DesiredState, Interruption, ObjectRef, Outcome};
use tokio_util::sync::CancellationToken;

#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

fn calmou_state() -> DesiredState {
    // Credential resolution goes through the environment; the file only names the variable.
    std::env::set_var("DB_INFRA_TEST_CALMOU_PASSWORD", "calmou_app_2024");
    parse_desired_state(
        r#"
database = "calmou_db"
collections = ["usuarios", "meditacoes"]

[[principals]]
username = "calmou_app"
credential = { env = "DB_INFRA_TEST_CALMOU_PASSWORD" }
roles = [{ role = "readWrite" }]
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn file_locked_run_reconciles_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let desired = calmou_state();
    let mut engine = InMemoryEngine::new();
    let options = RunOptions::default();

    let lock = FileLock::for_key(dir.path(), "provision:calmou_db:test");
    let result = provision_with_lock(
        &mut engine,
        lock,
        &desired,
        &options,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(result.is_success());
    assert_eq!(result.counts().created, 3);

    // The lock must be free again for the next run.
    let lock = FileLock::for_key(dir.path(), "provision:calmou_db:test");
    let second = provision_with_lock(
        &mut engine,
        lock,
        &desired,
        &options,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(second
        .per_object
        .values()
        .all(|o| *o == Outcome::AlreadyExists));
}

#[tokio::test]
async fn held_lock_times_out_without_touching_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let desired = calmou_state();
    let mut engine = InMemoryEngine::new();
    let options = RunOptions {
        lock_timeout: Duration::from_millis(100),
        ..RunOptions::default()
    };

    let mut holder = FileLock::for_key(dir.path(), "provision:calmou_db:test");
    let held = holder.try_acquire().await.unwrap().expect("holder acquires");

    let err = provision_with_lock(
        &mut engine,
        FileLock::for_key(dir.path(), "provision:calmou_db:test"),
        &desired,
        &options,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DbInfraError::Lock { .. }), "{err}");
    assert_eq!(engine.calls(), 0);

    held.release().await.unwrap();
}

#[tokio::test]
async fn cancellation_while_waiting_for_the_lock_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let desired = calmou_state();
    let mut engine = InMemoryEngine::new();
    let options = RunOptions {
        lock_timeout: Duration::from_secs(30),
        ..RunOptions::default()
    };

    let mut holder = FileLock::for_key(dir.path(), "provision:calmou_db:test");
    let held = holder.try_acquire().await.unwrap().expect("holder acquires");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = provision_with_lock(
        &mut engine,
        FileLock::for_key(dir.path(), "provision:calmou_db:test"),
        &desired,
        &options,
        token,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DbInfraError::Cancelled { .. }), "{err}");
    assert_eq!(engine.calls(), 0);
    held.release().await.unwrap();
}

#[tokio::test]
async fn cancellation_mid_run_keeps_finished_outcomes() {
    let desired = calmou_state();
    let mut engine = InMemoryEngine::new();
    engine.stall_on("usuarios");
    let options = RunOptions {
        lock_mode: LockMode::Disabled,
        op_timeout: Duration::from_secs(60),
        ..RunOptions::default()
    };

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = provision_with_lock(&mut engine, InMemoryLock, &desired, &options, token)
        .await
        .unwrap();

    assert_eq!(result.interrupted, Some(Interruption::Cancelled));
    assert_eq!(
        result.per_object.iter().collect::<Vec<_>>(),
        vec![
            (&ObjectRef::principal("calmou_app"), &Outcome::Created),
            (
                &ObjectRef::collection("usuarios"),
                &Outcome::Failed("cancelled".into())
            ),
            (
                &ObjectRef::collection("meditacoes"),
                &Outcome::Failed("cancelled".into())
            ),
        ]
    );
    assert!(!result.is_success());
    assert!(engine.principal("calmou_db", "calmou_app").is_some());
}

#[tokio::test]
async fn body_timeout_reports_every_declared_object() {
    let desired = calmou_state().with_collection("avaliacoes");
    let mut engine = InMemoryEngine::new();
    engine.stall_on("usuarios");
    engine.stall_on("meditacoes");
    engine.stall_on("avaliacoes");
    let options = RunOptions {
        lock_mode: LockMode::Disabled,
        op_timeout: Duration::from_millis(100),
        body_timeout: Duration::from_millis(150),
        ..RunOptions::default()
    };

    let result = provision_with_lock(
        &mut engine,
        InMemoryLock,
        &desired,
        &options,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.interrupted, Some(Interruption::Deadline));
    assert_eq!(result.per_object.len(), 4);
    assert_eq!(
        result.outcome(&ObjectRef::principal("calmou_app")),
        Some(&Outcome::Created)
    );
    assert!(engine.principal("calmou_db", "calmou_app").is_some());
    for name in ["usuarios", "meditacoes", "avaliacoes"] {
        match result.outcome(&ObjectRef::collection(name)) {
            Some(Outcome::Failed(reason)) => assert!(reason.starts_with("timeout"), "{reason}"),
            other => panic!("{name}: expected timeout, got {other:?}"),
        }
    }
    assert_eq!(result.counts().failed, 3);
}

#[tokio::test]
async fn invalid_state_never_reaches_the_engine() {
    let desired = DesiredState::new("calmou_db")
        .with_collection("usuarios")
        .with_collection("usuarios");
    let mut engine = InMemoryEngine::new();

    let err = provision_with_lock(
        &mut engine,
        InMemoryLock,
        &desired,
        &RunOptions::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn force_update_flows_through_run_options() {
    let desired = calmou_state();
    let mut engine = InMemoryEngine::new();
    engine.insert_principal(
        "calmou_db",
        "calmou_app",
        provisioner::Secret::new("old"),
        Default::default(),
    );

    let options = RunOptions {
        force_update: true,
        lock_mode: LockMode::Disabled,
        ..RunOptions::default()
    };
    let result = provision_with_lock(
        &mut engine,
        InMemoryLock,
        &desired,
        &options,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        result.outcome(&ObjectRef::principal("calmou_app")),
        Some(&Outcome::Updated)
    );
    assert_eq!(
        engine.principal("calmou_db", "calmou_app").unwrap().secret.expose(),
        "calmou_app_2024"
    );
}
