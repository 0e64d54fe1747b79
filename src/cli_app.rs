//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use thiserror::Error;

use volume_relief::cluster::client::KubeClient;
use volume_relief::core::config::{CliOverrides, Config, parse_duration};
use volume_relief::core::errors::VrlError;
use volume_relief::daemon::loop_main::{DaemonArgs, ReliefDaemon, resolve_startup};
use volume_relief::platform::pal::LinuxPlatform;

/// Volume relief sidecar: grows cloud persistent disks and their filesystems
/// before they fill up.
#[derive(Debug, Parser)]
#[command(
    name = "vrelief",
    author,
    version,
    about = "Relieve disk pressure on cloud-backed volumes",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// TOML config file; flags and VRL_* env vars override it.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(flatten)]
    target: TargetArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args, Default)]
struct TargetArgs {
    /// Container whose volume mounts are watched.
    #[arg(long, global = true, value_name = "NAME")]
    container_name: Option<String>,
    /// Pod this sidecar runs in.
    #[arg(long, global = true, value_name = "NAME")]
    pod_name: Option<String>,
    /// Namespace of the pod.
    #[arg(long, global = true, value_name = "NAME")]
    namespace: Option<String>,
    /// Comma-separated volume names to watch.
    #[arg(long, global = true, value_name = "A,B,...")]
    volumes: Option<String>,
    /// Usage percentage at which relief starts [default: 80].
    #[arg(long, global = true, value_name = "PCT", value_parser = clap::value_parser!(u8).range(1..=100))]
    threshold: Option<u8>,
    /// Percentage to grow the disk by [default: 20].
    #[arg(long, global = true, value_name = "PCT", value_parser = clap::value_parser!(u32).range(1..))]
    expand_by: Option<u32>,
    /// Time between passes, e.g. `60s` or `2m` [default: 60s].
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_poll_period)]
    poll_period: Option<Duration>,
}

impl TargetArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            container_name: self.container_name.clone(),
            pod_name: self.pod_name.clone(),
            namespace: self.namespace.clone(),
            volumes: self.volumes.clone(),
            threshold_pct: self.threshold,
            expand_by_pct: self.expand_by,
            poll_period: self.poll_period,
        }
    }
}

fn parse_poll_period(raw: &str) -> Result<Duration, String> {
    parse_duration("--poll-period", raw).map_err(|e| e.to_string())
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve volumes and run the relief loop.
    Run(RunArgs),
    /// Resolve and validate volumes, print them as JSON, and exit.
    Resolve,
    /// Print the effective configuration as TOML.
    Config,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Make a single pass and exit; non-zero if any volume could not be relieved.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration or flags.
    #[error("{0}")]
    User(String),
    /// Resolution or runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML serialization failed.
    #[error("failed to render config: {0}")]
    Toml(#[from] toml::ser::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) | Self::Toml(_) => 3,
        }
    }
}

impl From<VrlError> for CliError {
    fn from(error: VrlError) -> Self {
        match error {
            VrlError::InvalidConfig { .. }
            | VrlError::MissingConfig { .. }
            | VrlError::ConfigParse { .. } => Self::User(error.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Run(args) => run_daemon(cli, args),
        Command::Resolve => run_resolve(cli),
        Command::Config => run_config(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref(), &cli.target.overrides())?)
}

fn run_daemon(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = ReliefDaemon::init(config)?;
    eprintln!(
        "[VRL-DAEMON] watching {} volume(s){}",
        daemon.volumes().len(),
        if args.once { ", single pass" } else { "" }
    );
    let summary = daemon.run(DaemonArgs { once: args.once });
    if args.once && summary.failed > 0 {
        return Err(CliError::Runtime(format!(
            "{} volume(s) could not be relieved",
            summary.failed
        )));
    }
    Ok(())
}

fn run_resolve(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let cluster = KubeClient::from_config(&config.cluster)?;
    let platform = LinuxPlatform::new(&config.host);
    let startup = resolve_startup(&config, &cluster, &platform)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string_pretty(&startup)?)?;
    Ok(())
}

fn run_config(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut out = io::stdout().lock();
    write!(out, "{}", toml::to_string_pretty(&config)?)?;
    writeln!(out, "# config_hash = {}", config.stable_hash()?)?;
    Ok(())
}
