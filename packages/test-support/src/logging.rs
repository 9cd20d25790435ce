//! Log capture for test binaries.
//!
//! Each integration test binary installs the subscriber once from a
//! `#[ctor::ctor]` hook. Output goes through the libtest writer so it only
//! shows for failing tests (or with `--nocapture`).

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

const QUIET: &str = "warn";

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// `TEST_LOG` wins over `RUST_LOG`; blank values count as unset.
fn directives(test_log: Option<String>, rust_log: Option<String>) -> String {
    [test_log, rust_log]
        .into_iter()
        .flatten()
        .find(|d| !d.trim().is_empty())
        .unwrap_or_else(|| QUIET.to_string())
}

/// Install the test subscriber. Repeated calls are no-ops.
///
/// Returns false when another subscriber was already the global default.
pub fn init() -> bool {
    *INSTALLED.get_or_init(|| {
        let wanted = directives(
            std::env::var("TEST_LOG").ok(),
            std::env::var("RUST_LOG").ok(),
        );
        // A typo in the directives should not silence the run.
        let filter = EnvFilter::try_new(&wanted).unwrap_or_else(|_| EnvFilter::new(QUIET));

        fmt()
            .compact()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .with_target(true)
            .try_init()
            .is_ok()
    })
}
