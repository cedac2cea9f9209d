mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cvm")]
#[command(about = "Run contract scripts in a gas-metered V8 sandbox")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ~/.config/cvm/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script and print its result
    Run {
        /// Script file
        file: PathBuf,

        /// Gas budget (overrides the config file)
        #[arg(short, long)]
        gas_limit: Option<u64>,

        /// Wall-clock budget, e.g. "500ms" or "2s" (overrides the config file)
        #[arg(short, long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Directory searched first by require (overrides the config file)
        #[arg(short, long)]
        module_path: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a contract and call one of its APIs
    Call {
        /// Contract file (its `module.exports` is the contract constructor)
        file: PathBuf,

        /// API to call
        api: String,

        /// Arguments, each parsed as JSON or else taken as a string
        args: Vec<String>,

        /// Gas budget (overrides the config file)
        #[arg(short, long)]
        gas_limit: Option<u64>,

        /// Wall-clock budget (overrides the config file)
        #[arg(short, long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the gas-instrumented form of a script
    Compile {
        /// Script file
        file: PathBuf,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a config file with the default settings
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            file,
            gas_limit,
            timeout,
            module_path,
            json,
        } => {
            let config = commands::load_config(config_file)?;
            let options = commands::RunOptions {
                gas_limit,
                timeout,
                module_path,
            };
            let result = commands::run_script(&config, &file, options).await?;
            commands::print_result(&result, json)?;
            Ok(if result.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Call {
            file,
            api,
            args,
            gas_limit,
            timeout,
            json,
        } => {
            let config = commands::load_config(config_file)?;
            let options = commands::RunOptions {
                gas_limit,
                timeout,
                module_path: None,
            };
            let args = commands::parse_call_args(&args);
            let result = commands::call_contract(&config, &file, &api, &args, options)?;
            commands::print_result(&result, json)?;
            Ok(if result.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Compile { file } => {
            let config = commands::load_config(config_file)?;
            let instrumented = commands::compile_script(&config, &file)?;
            println!("{instrumented}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Init { force } => {
                    let path = commands::config_init(config_file, force)?;
                    println!("Wrote {}", path.display());
                }
                ConfigAction::Show => {
                    let config = commands::load_config(config_file)?;
                    println!("{}", commands::config_show(&config)?);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
