//! rffmpeg-autoscaler: the autoscaling daemon.
//!
//! Watches transcode load on the fallback host and on the cloud workers
//! registered in the rffmpeg database, adding a Hetzner worker when the
//! fallback is backed up and retiring idle workers once it is quiet.
//!
//! # Usage
//!
//! ```text
//! rffmpeg-autoscaler --config /config/rffmpeg-autoscaler.toml -v
//! rffmpeg-autoscaler hosts
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rffmpeg_core::{DEFAULT_CONFIG_PATH, ENV_PREFIX};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rffmpeg-autoscaler", version, about = "Autoscale rffmpeg transcoding workers")]
struct Cli {
    /// Configuration file. Missing files fall back to defaults and the environment.
    #[arg(long, env = "RFFMPEG_AUTOSCALER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the control loop until SIGINT or SIGTERM (default).
    Run,
    /// Print the registered workers as JSON.
    Hosts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// `-v` count, or the numeric `RFFMPEG_AUTOSCALER_VERBOSITY` when no flag is given.
fn verbosity(flag: u8, env: Option<String>) -> u8 {
    if flag > 0 {
        return flag;
    }
    env.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

/// Default filter for a verbosity level.
fn default_directives(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "info,rffmpeg_autoscaler=debug,rffmpeg_autoscale=debug,rffmpeg_cloud=debug,rffmpeg_state=debug",
        _ => "debug,rffmpeg_autoscaler=trace,rffmpeg_autoscale=trace,rffmpeg_cloud=trace,rffmpeg_state=trace",
    }
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = verbosity(
        cli.verbose,
        std::env::var(format!("{ENV_PREFIX}VERBOSITY")).ok(),
    );
    init_tracing(verbose, cli.log_format);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => daemon::run(&cli.config).await,
        Command::Hosts => daemon::print_hosts(&cli.config).await,
    }
}
