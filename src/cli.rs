//! Command-line interface for script-host.
//!
//! This module handles CLI argument parsing and the subcommands that finish
//! without a runtime (`config`).

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::{Path, PathBuf};

use script_host_config::ScriptHostConfig;

/// script-host - run editor scripts under supervision and stream their events
#[derive(Parser)]
#[command(name = "script-host")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: ~/.config/script-host/config.yaml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log level for the debug log (off, error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", value_parser = parse_level, global = true)]
    pub log_level: Option<LevelFilter>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script and print its routed events as JSON lines
    Run {
        /// Script file name, resolved against the base path
        script: String,

        /// Directory the script name is resolved against
        #[arg(long, value_name = "DIR")]
        base_path: Option<PathBuf>,

        /// Ask the script to stop after the specified number of seconds
        #[arg(long, value_name = "SECONDS")]
        stop_after: Option<f64>,
    },
    /// Install the dependencies of a script directory through the helper
    Install {
        /// Directory whose dependencies should be installed
        target: PathBuf,
    },
    /// Print the effective configuration as YAML
    Config,
}

/// What the binary should do once logging and the runtime are up.
#[derive(Clone, Debug)]
pub enum Action {
    Run {
        script: String,
        base_path: Option<PathBuf>,
        stop_after: Option<f64>,
    },
    Install {
        target: PathBuf,
    },
}

/// Runtime options passed from CLI to the runner
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    pub action: Action,
    /// Effective configuration
    pub config: ScriptHostConfig,
    /// `--log-level` override
    pub log_level: Option<LevelFilter>,
}

/// Result of CLI processing
pub enum CliResult {
    /// Continue with runtime startup
    Continue(Box<RuntimeOptions>),
    /// Exit with the given code (subcommand completed)
    Exit(i32),
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse()
        .map_err(|_| format!("invalid log level '{value}'"))
}

/// Load the configuration from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ScriptHostConfig> {
    let config = match path {
        Some(path) => ScriptHostConfig::load_from(path)?,
        None => ScriptHostConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

/// Process CLI arguments and handle subcommands
pub fn process_cli() -> CliResult {
    process(Cli::parse())
}

fn process(cli: Cli) -> CliResult {
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("script-host: error: {e:#}");
            return CliResult::Exit(1);
        }
    };

    let action = match cli.command {
        Commands::Config => {
            return match config.to_yaml() {
                Ok(yaml) => {
                    print!("{yaml}");
                    CliResult::Exit(0)
                }
                Err(e) => {
                    eprintln!("script-host: error: {e}");
                    CliResult::Exit(1)
                }
            };
        }
        Commands::Run {
            script,
            base_path,
            stop_after,
        } => Action::Run {
            script,
            base_path,
            stop_after,
        },
        Commands::Install { target } => Action::Install { target },
    };

    CliResult::Continue(Box::new(RuntimeOptions {
        action,
        config,
        log_level: cli.log_level,
    }))
}
