//! Command-line interface (spec.md §6): a single-subcommand daemon with
//! no interactive prompts — just flags and a positional broker hostname.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "vaultaire-reader",
    about = "Reader daemon for a compressed, bucketed time-series point store"
)]
pub struct Cli {
    /// Optional path to a config file (overrides the default search path)
    #[clap(short, long)]
    pub config: Option<String>,

    /// Enable debug logging and echo telemetry lines to stdout
    #[clap(short, long)]
    pub debug: bool,

    /// Number of reader worker tasks. Defaults to the number of logical
    /// CPUs, resolved after parsing rather than inside a clap default —
    /// `std::thread::available_parallelism` can fail, and a CLI default
    /// closure has nowhere good to report that.
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// RADOS pool holding the bucket objects
    #[clap(short, long, default_value = "vaultaire")]
    pub pool: String,

    /// RADOS user to connect as
    #[clap(short, long, default_value = "vaultaire")]
    pub user: String,

    /// Hostname of the message-broker process to connect the router and
    /// telemetry sockets to
    pub broker: String,
}

impl Cli {
    /// Resolves the effective worker count: the `--workers` override if
    /// given, otherwise the number of logical CPUs (spec.md §6).
    pub fn resolve_workers(&self) -> Result<usize, crate::error::VaultaireError> {
        match self.workers {
            Some(n) if n > 0 => Ok(n),
            Some(_) => Err(crate::error::VaultaireError::StartupError(
                "--workers must be at least 1".to_string(),
            )),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .map_err(|e| {
                    crate::error::VaultaireError::StartupError(format!(
                        "failed to detect logical CPU count: {e}"
                    ))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["vaultaire-reader", "broker.example.com"]);
        assert_eq!(cli.broker, "broker.example.com");
        assert_eq!(cli.pool, "vaultaire");
        assert!(!cli.debug);
        assert!(cli.workers.is_none());
    }

    #[test]
    fn parses_full_invocation() {
        let cli = Cli::parse_from([
            "vaultaire-reader",
            "--debug",
            "--workers",
            "4",
            "--pool",
            "metrics",
            "--user",
            "reader",
            "broker.example.com",
        ]);
        assert!(cli.debug);
        assert_eq!(cli.resolve_workers().unwrap(), 4);
        assert_eq!(cli.pool, "metrics");
        assert_eq!(cli.user, "reader");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let cli = Cli::parse_from(["vaultaire-reader", "--workers", "0", "broker.example.com"]);
        assert!(cli.resolve_workers().is_err());
    }
}
