//! Logging setup (SPEC_FULL.md A.1): a single fallible function called
//! once from `main`, the way the teacher's `setup_logging` is shaped,
//! minus the OTEL layer the teacher's web/API surface needs and this
//! daemon does not (spec.md §1 scopes logging setup out as an external
//! collaborator; this is the minimal ambient piece main.rs still needs to
//! call).

use tracing_subscriber::EnvFilter;

/// Builds the `RUST_LOG`-driven filter, raised to `debug` crate-wide when
/// `debug` is true regardless of what `RUST_LOG` says — matching `--debug`
/// (spec.md §4.8 task 1: debug mode also echoes telemetry to stdout).
fn build_loglevel_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global `tracing` subscriber. Called exactly once from
/// `main` before any other task spawns.
pub fn init(debug: bool) -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(build_loglevel_filter(debug))
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())
}
