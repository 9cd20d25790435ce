use std::fmt::Write;

use db_infra::EngineReport;
use provisioner::{DatabaseObservation, ReconciliationResult};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// 0 when every object reconciled, 1 when any object failed.
pub fn exit_code(result: &ReconciliationResult) -> i32 {
    if result.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

pub fn render_result_text(result: &ReconciliationResult) -> String {
    let mut out = String::new();
    let observation = match result.database {
        DatabaseObservation::Existing => "existing",
        DatabaseObservation::Pending => "pending first write",
    };
    let _ = writeln!(out, "database {} ({observation})", result.database_name);

    let width = result
        .per_object
        .keys()
        .map(|o| o.to_string().len())
        .max()
        .unwrap_or(0);
    for (object, outcome) in &result.per_object {
        let _ = writeln!(out, "  {:<width$}  {outcome}", object.to_string());
    }

    if let Some(stop) = result.interrupted {
        let _ = writeln!(out, "run interrupted ({stop}); unfinished objects marked failed");
    }

    let counts = result.counts();
    let _ = writeln!(
        out,
        "summary: created={} already_exists={} updated={} failed={}",
        counts.created, counts.already_exists, counts.updated, counts.failed
    );
    out
}

pub fn render_report_text(report: &EngineReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "engine {} reachable", report.engine);
    if !report.exists {
        let _ = writeln!(out, "database {} does not exist yet", report.database);
        return out;
    }
    let _ = writeln!(
        out,
        "database {} has {} collection(s)",
        report.database,
        report.collections.len()
    );
    for collection in &report.collections {
        let _ = writeln!(
            out,
            "  {}: {} document(s)",
            collection.name, collection.documents
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use db_infra::infra::db::CollectionReport;
    use provisioner::memory::{InMemoryEngine, StaticSecrets};
    use provisioner::{
        CredentialRef, DesiredState, Principal, Provisioner, RoleGrant, RunLimits,
    };

    use super::*;

    async fn calmou_result(engine: &mut InMemoryEngine) -> ReconciliationResult {
        let desired = DesiredState::new("calmou_db")
            .with_principal(
                Principal::new("calmou_app", CredentialRef::Env("PWD".into()))
                    .with_role(RoleGrant::new("readWrite", "calmou_db")),
            )
            .with_collection("usuarios")
            .with_collection("meditacoes");
        Provisioner::new()
            .secrets(StaticSecrets::new().with("PWD", "calmou_app_2024"))
            .reconcile(&desired, engine)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn text_report_lists_every_object() {
        let mut engine = InMemoryEngine::new();
        let result = calmou_result(&mut engine).await;

        let text = render_result_text(&result);
        assert_eq!(
            text,
            "database calmou_db (pending first write)\n\
             \x20 principal:calmou_app   created\n\
             \x20 collection:usuarios    created\n\
             \x20 collection:meditacoes  created\n\
             summary: created=3 already_exists=0 updated=0 failed=0\n"
        );
        assert_eq!(exit_code(&result), EXIT_OK);
    }

    #[tokio::test]
    async fn any_failure_sets_a_nonzero_exit_code() {
        let mut engine = InMemoryEngine::new();
        engine.fail_collection("usuarios", "not authorized");
        let result = calmou_result(&mut engine).await;

        assert_eq!(exit_code(&result), EXIT_FAILED);
        assert!(render_result_text(&result).contains("failed (create failed: not authorized)"));
    }

    #[tokio::test]
    async fn cancelled_run_is_called_out() {
        let mut engine = InMemoryEngine::new();
        let desired = DesiredState::new("calmou_db").with_collection("usuarios");
        let limits = RunLimits::unbounded();
        limits.cancellation.cancel();

        let result = Provisioner::new()
            .reconcile_within(&desired, &mut engine, &limits)
            .await
            .unwrap();

        let text = render_result_text(&result);
        assert!(text.contains("collection:usuarios  failed (cancelled)"), "{text}");
        assert!(text.contains("run interrupted (cancelled)"), "{text}");
        assert_eq!(exit_code(&result), EXIT_FAILED);
    }

    #[test]
    fn engine_report_lists_collections() {
        let report = EngineReport {
            engine: "mongodb://localhost:27017/".into(),
            database: "calmou_db".into(),
            exists: true,
            collections: vec![
                CollectionReport {
                    name: "meditacoes".into(),
                    documents: 12,
                },
                CollectionReport {
                    name: "usuarios".into(),
                    documents: 0,
                },
            ],
        };
        let text = render_report_text(&report);
        assert!(text.contains("database calmou_db has 2 collection(s)"));
        assert!(text.contains("  meditacoes: 12 document(s)"));
    }

    #[test]
    fn missing_database_is_reported() {
        let report = EngineReport {
            engine: "mongodb://localhost:27017/".into(),
            database: "calmou_db".into(),
            exists: false,
            collections: vec![],
        };
        assert!(render_report_text(&report).contains("does not exist yet"));
    }
}
