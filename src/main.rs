mod config;
mod detect;
mod output_log;
mod report;
mod server;
mod signals;
mod ticker;
mod verdict;
mod watchdog;

use clap::Parser;
use config::{Overrides, SmokeConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Smoke test for a development server: start it, wait for its ready
/// banner within a bounded number of polls, stop it, and fail if it never
/// got ready or printed a crash trace.
#[derive(Parser, Debug)]
#[command(name = "devsmoke", version, about)]
pub struct Cli {
    /// Server executable (default: from config)
    #[arg(value_name = "SERVER")]
    server: Option<String>,

    /// Arguments passed to the server (after `--`)
    #[arg(last = true, value_name = "ARGS")]
    server_args: Vec<String>,

    /// Config file path [default: devsmoke.toml, if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Max polls before giving up (overrides config)
    #[arg(long)]
    max_ticks: Option<u32>,

    /// Ready marker line (overrides config)
    #[arg(long)]
    marker: Option<String>,

    /// Seconds to wait after interrupting before killing the server (overrides config)
    #[arg(long)]
    grace_secs: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (state transitions, signals)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            command: self.server.clone(),
            args: (!self.server_args.is_empty()).then(|| self.server_args.clone()),
            interval_ms: self.interval_ms,
            max_ticks: self.max_ticks,
            marker: self.marker.clone(),
            grace_secs: self.grace_secs,
        }
    }

    fn default_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn init_logging(cli: &Cli) {
    // RUST_LOG wins over -v/-q.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<SmokeConfig, config::ConfigError> {
    let (path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(config::DEFAULT_CONFIG_FILE), false),
    };
    let mut config = SmokeConfig::load(&path, required)?;
    config.apply(cli.overrides());
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                println!("Dry run: config validated, not running.");
                print!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("Error: failed to render config: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let report = match watchdog::Watchdog::new(config).run().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(state = ?report.final_state(), elapsed_ms = report.elapsed_ms, "watchdog done");

    if cli.json {
        match report::render_json(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: failed to render report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", report::render_text(&report));
    }

    ExitCode::from(report.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["devsmoke"]).unwrap();
        assert!(cli.server.is_none());
        assert!(cli.server_args.is_empty());
        assert_eq!(cli.default_level(), "info");
        let overrides = cli.overrides();
        assert!(overrides.command.is_none());
        assert!(overrides.args.is_none());
    }

    #[test]
    fn test_cli_server_and_trailing_args() {
        let cli = Cli::try_parse_from([
            "devsmoke",
            "--max-ticks",
            "40",
            "./tools/run-dev",
            "--",
            "--interface",
            "0.0.0.0",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.command.as_deref(), Some("./tools/run-dev"));
        assert_eq!(
            overrides.args,
            Some(vec!["--interface".to_string(), "0.0.0.0".to_string()])
        );
        assert_eq!(overrides.max_ticks, Some(40));
    }

    #[test]
    fn test_cli_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["devsmoke", "-v", "-q"]).is_err());
        let cli = Cli::try_parse_from(["devsmoke", "-q"]).unwrap();
        assert_eq!(cli.default_level(), "warn");
    }

    #[test]
    fn test_load_config_applies_overrides_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smoke.toml");
        std::fs::write(&path, "[poll]\ninterval_ms = 250\n").unwrap();
        let path_str = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["devsmoke", "-c", path_str, "--max-ticks", "8"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.poll.max_ticks, 8);

        let cli = Cli::try_parse_from(["devsmoke", "-c", path_str, "--max-ticks", "0"]).unwrap();
        assert!(matches!(
            load_config(&cli),
            Err(config::ConfigError::Invalid(_))
        ));
    }
}
