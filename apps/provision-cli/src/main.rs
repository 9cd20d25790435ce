mod report;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use db_infra::config::db::{EngineSettings, DEFAULT_AUTH_SOURCE, DEFAULT_CONNECT_TIMEOUT_MS};
use db_infra::config::state::load_desired_state;
use db_infra::{check_engine, orchestrate_provisioning, LockMode, RunOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::report::{exit_code, render_report_text, render_result_text, EXIT_FAILED, EXIT_USAGE};

const DEFAULT_LOG_FILTER: &str = "provision=info,db_infra=info,provisioner=info,mongodb=warn";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "provision")]
#[command(about = "Declarative database provisioning")]
struct Args {
    /// Command to run: apply | check
    #[arg(default_value = "apply")]
    command: String,

    /// Desired-state file
    #[arg(short, long, env = "PROVISION_STATE", default_value = "provision.toml")]
    state: PathBuf,

    /// Rewrite credentials and role grants of principals that already exist
    #[arg(long)]
    force_update: bool,

    /// Skip the host-level provisioning lock
    #[arg(long)]
    no_lock: bool,

    #[arg(short, long, value_enum, default_value = "text")]
    output: Output,

    /// Full connection string; overrides host, port and credentials
    #[arg(long, env = "MONGO_URI", hide_env_values = true)]
    uri: Option<String>,

    #[arg(long, env = "MONGO_HOST", default_value = "localhost")]
    host: String,

    #[arg(long, env = "MONGO_PORT", default_value_t = 27017)]
    port: u16,

    #[arg(long, env = "MONGO_ADMIN_USER")]
    admin_user: Option<String>,

    #[arg(long, env = "MONGO_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    #[arg(long, env = "MONGO_AUTH_SOURCE", default_value = DEFAULT_AUTH_SOURCE)]
    auth_source: String,

    #[arg(long, env = "MONGO_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,
}

impl Args {
    fn engine_settings(&self) -> EngineSettings {
        let timeout = Duration::from_millis(self.connect_timeout_ms);
        EngineSettings {
            uri: self.uri.clone(),
            host: self.host.clone(),
            port: self.port,
            admin_user: self.admin_user.clone(),
            admin_password: self.admin_password.clone(),
            auth_source: self.auth_source.clone(),
            connect_timeout: timeout,
            server_selection_timeout: timeout,
        }
    }

    fn lock_mode(&self) -> LockMode {
        if self.no_lock {
            LockMode::Disabled
        } else {
            LockMode::File
        }
    }
}

enum Command {
    Apply,
    Check,
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to render report: {e}");
            std::process::exit(EXIT_FAILED);
        }
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--output json` stays machine-readable on stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    let command = match args.command.as_str() {
        "apply" => Command::Apply,
        "check" => Command::Check,
        other => {
            eprintln!("Unknown command: {other}. Use: apply | check");
            std::process::exit(EXIT_USAGE);
        }
    };

    let desired = match load_desired_state(&args.state) {
        Ok(desired) => desired,
        Err(e) => {
            eprintln!("Cannot load {}: {e}", args.state.display());
            std::process::exit(EXIT_FAILED);
        }
    };
    let settings = args.engine_settings();

    match command {
        Command::Check => match check_engine(&settings, &desired.database_name).await {
            Ok(report) => match args.output {
                Output::Text => print!("{}", render_report_text(&report)),
                Output::Json => print_json(&report),
            },
            Err(e) => {
                eprintln!("Engine check failed: {e}");
                std::process::exit(EXIT_FAILED);
            }
        },
        Command::Apply => {
            let mut options = match RunOptions::from_env() {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(EXIT_USAGE);
                }
            };
            options.force_update = args.force_update;
            options.lock_mode = args.lock_mode();

            let token = CancellationToken::new();
            let on_signal = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("signal=interrupt cancelling provisioning run");
                    on_signal.cancel();
                }
            });

            match orchestrate_provisioning(&settings, &desired, &options, token).await {
                Ok(result) => {
                    match args.output {
                        Output::Text => print!("{}", render_result_text(&result)),
                        Output::Json => print_json(&result),
                    }
                    std::process::exit(exit_code(&result));
                }
                Err(e) => {
                    eprintln!("Provisioning failed: {e}");
                    std::process::exit(EXIT_FAILED);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_engine_settings() {
        let args = Args::try_parse_from([
            "provision",
            "apply",
            "--host",
            "db.internal",
            "--port",
            "27018",
            "--admin-user",
            "root",
            "--admin-password",
            "s3cr3t",
            "--auth-source",
            "admin",
            "--connect-timeout-ms",
            "750",
        ])
        .unwrap();

        let settings = args.engine_settings();
        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.port, 27018);
        assert_eq!(settings.admin_user.as_deref(), Some("root"));
        assert_eq!(settings.admin_password.as_deref(), Some("s3cr3t"));
        assert_eq!(settings.connect_timeout, Duration::from_millis(750));
        assert_eq!(settings.server_selection_timeout, Duration::from_millis(750));
    }

    #[test]
    fn no_lock_disables_the_file_lock() {
        let args = Args::try_parse_from(["provision", "--no-lock", "--force-update"]).unwrap();
        assert_eq!(args.command, "apply");
        assert_eq!(args.lock_mode(), LockMode::Disabled);
        assert!(args.force_update);

        let args = Args::try_parse_from(["provision", "check", "--output", "json"]).unwrap();
        assert_eq!(args.command, "check");
        assert_eq!(args.output, Output::Json);
        assert_eq!(args.lock_mode(), LockMode::File);
    }

    #[test]
    fn unknown_output_format_is_a_usage_error() {
        let err = Args::try_parse_from(["provision", "--output", "yaml"]).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn state_file_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(
            &path,
            "database = \"calmou_db\"\ncollections = [\"usuarios\"]\n",
        )
        .unwrap();

        let args =
            Args::try_parse_from(["provision", "--state", path.to_str().unwrap()]).unwrap();
        let desired = load_desired_state(&args.state).unwrap();
        assert_eq!(desired.database_name, "calmou_db");
        assert_eq!(desired.collections, vec!["usuarios".to_string()]);
    }
}
