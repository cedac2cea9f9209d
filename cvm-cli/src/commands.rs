//! CLI command implementations

use anyhow::{bail, Context, Result};
use cvm_common::{AppConfig, ExecutionRequest, ExecutionResult, SandboxSettings};
use cvm_sandbox::{ResourceLimits, Sandbox, SandboxService, SnapshotConfig, V8Engine};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Command-line overrides for `cvm run`
#[derive(Debug, Default)]
pub struct RunOptions {
    pub gas_limit: Option<u64>,
    pub timeout: Option<Duration>,
    pub module_path: Option<PathBuf>,
}

/// Load the config file given on the command line, or the default one
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load().context("Failed to load config")?,
    };
    Ok(config)
}

/// Build a V8-backed sandbox from the sandbox settings
pub fn build_sandbox(settings: &SandboxSettings) -> Result<Sandbox<V8Engine>> {
    let mut engine = V8Engine::builder().max_heap_bytes(settings.max_heap_bytes);

    if let Some(snapshot) = settings.snapshot_path()? {
        engine = engine
            .snapshot_file(SnapshotConfig::new(&snapshot))
            .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    }
    for script in settings.bootstrap_paths()? {
        engine = engine
            .bootstrap_file(&script)
            .with_context(|| format!("Failed to read bootstrap script {}", script.display()))?;
    }

    let engine = engine.build().context("Failed to start V8 engine")?;
    let limits = ResourceLimits::default()
        .with_poll_interval(settings.poll_interval)
        .with_max_heap_bytes(settings.max_heap_bytes);

    let sandbox = Sandbox::builder(engine)
        .limits(limits)
        .module_path(settings.module_path()?)
        .gas_limit(settings.gas_limit)
        .build()
        .context("Failed to create sandbox")?;

    debug!(sandbox = ?sandbox, "Sandbox ready");
    Ok(sandbox)
}

fn read_script(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Execute a script file under the configured limits
pub async fn run_script(
    config: &AppConfig,
    file: &Path,
    options: RunOptions,
) -> Result<ExecutionResult> {
    let code = read_script(file)?;

    let mut settings = config.sandbox.clone();
    if let Some(path) = options.module_path {
        settings.module_path = path.display().to_string();
    }

    let service = SandboxService::new(build_sandbox(&settings)?);
    let request = ExecutionRequest::new(code)
        .with_timeout(options.timeout.unwrap_or(settings.timeout))
        .with_gas_limit(options.gas_limit.unwrap_or(settings.gas_limit));

    info!(file = %file.display(), "Running script");
    let (id, result) = service.execute(request).await?;
    debug!(execution_id = %id, gas_used = result.gas_used, "Run complete");
    Ok(result)
}

/// Command-line arguments for a contract call: JSON where it parses,
/// plain strings otherwise
pub fn parse_call_args(args: &[String]) -> Vec<serde_json::Value> {
    args.iter()
        .map(|arg| {
            serde_json::from_str(arg).unwrap_or_else(|_| serde_json::Value::String(arg.clone()))
        })
        .collect()
}

/// Load a contract file and call one of its APIs
pub fn call_contract(
    config: &AppConfig,
    file: &Path,
    api: &str,
    args: &[serde_json::Value],
    options: RunOptions,
) -> Result<ExecutionResult> {
    let code = read_script(file)?;
    let sandbox = build_sandbox(&config.sandbox)?;
    sandbox.set_gas_limit(options.gas_limit.unwrap_or(config.sandbox.gas_limit));

    let deadline = Instant::now() + options.timeout.unwrap_or(config.sandbox.timeout);
    info!(file = %file.display(), api, "Calling contract");
    Ok(sandbox.call(&code, api, args, deadline))
}

/// Gas-instrument a script file
pub fn compile_script(config: &AppConfig, file: &Path) -> Result<String> {
    let code = read_script(file)?;
    let sandbox = build_sandbox(&config.sandbox)?;
    Ok(sandbox.compile(&code)?)
}

/// Print a result: the value on stdout, the error on stderr
pub fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if let Some(error) = &result.error {
        eprintln!("{error}");
    } else if let Some(value) = &result.value {
        println!("{value}");
    }
    eprintln!("gas used: {}", result.gas_used);
    Ok(())
}

/// Write the default configuration
pub fn config_init(path: Option<&Path>, force: bool) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_path()?,
    };
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    AppConfig::default().save_to(&path)?;
    Ok(path)
}

/// Render the effective configuration as TOML
pub fn config_show(config: &AppConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
