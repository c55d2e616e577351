use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use groundcheck_core::{ConfigError, Hints, PatternRegistry, ValidationConfigFile, ValidationLevel};
use groundcheck_runtime::{RuntimeConfig, UnifiedValidator, ValidationRequest};

/// Exit code when the response is rejected.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "groundcheck")]
#[command(about = "Detect hallucinations in LLM agent responses")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one agent response and print the result as JSON
    Validate(ValidateArgs),

    /// List configured agent types
    Agents {
        /// Validation config file (YAML or JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a validation config file against the schema and rule compiler
    CheckConfig {
        file: PathBuf,
    },
}

#[derive(Args)]
struct ValidateArgs {
    /// Agent type (chef, receipt, weather, search, ...)
    #[arg(short, long)]
    agent: String,

    /// Override the agent's validation level
    #[arg(short, long)]
    level: Option<ValidationLevel>,

    /// Validation config file (YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Runtime config file (YAML)
    #[arg(long)]
    runtime_config: Option<PathBuf>,

    /// File holding the context the agent worked from
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Validator hint as key=value, value parsed as JSON when possible
    #[arg(long = "hint", value_name = "KEY=VALUE")]
    hints: Vec<String>,

    /// Per-check timeout, e.g. 500ms
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Pretty-print the result
    #[arg(long)]
    pretty: bool,

    /// Response to validate, "-" for stdin
    #[arg(default_value = "-")]
    input: String,
}

#[derive(Serialize)]
struct AgentSummary {
    agent_type: String,
    validator: String,
    validation_level: ValidationLevel,
    confidence_threshold: f64,
    hallucination_threshold: f64,
    critical_patterns: usize,
    warning_patterns: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate(args) => run_validate(args).await,
        Commands::Agents { config, json } => {
            list_agents(config.as_deref(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { file } => Ok(check_config(&file)),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_registry(config: Option<&Path>) -> Result<PatternRegistry> {
    let registry = match config {
        Some(path) => ValidationConfigFile::from_path(path)
            .and_then(|file| file.into_registry())
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PatternRegistry::builtin()?,
    };
    Ok(registry)
}

fn parse_hints(raw: &[String]) -> Result<Hints> {
    let mut hints = Hints::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("Hint must be KEY=VALUE, got '{}'", entry);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Hint key is empty in '{}'", entry);
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        hints.insert(key, value);
    }
    Ok(hints)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read response from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
    }
}

async fn run_validate(args: ValidateArgs) -> Result<ExitCode> {
    let registry = load_registry(args.config.as_deref())?;

    let mut runtime = match &args.runtime_config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(timeout) = args.timeout {
        runtime = runtime.with_check_timeout(timeout);
    }
    // One-shot process: nothing to reuse
    runtime = runtime.without_cache();

    let context = match &args.context_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => String::new(),
    };

    let mut request = ValidationRequest::new(args.agent.as_str(), read_input(&args.input)?)
        .with_context(context)
        .with_hints(parse_hints(&args.hints)?);
    request.level = args.level;

    let validator = UnifiedValidator::new(Arc::new(registry), runtime);
    let result = validator.validate(request).await;
    tracing::info!(
        agent_type = %args.agent,
        recommendation = %result.recommendation,
        elapsed_ms = result.elapsed_ms,
        "Validation finished"
    );

    let output = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", output);

    Ok(if result.is_rejected() {
        ExitCode::from(EXIT_REJECTED)
    } else {
        ExitCode::SUCCESS
    })
}

fn summarize(registry: &PatternRegistry) -> Result<Vec<AgentSummary>> {
    registry
        .agent_types()
        .into_iter()
        .map(|agent_type| {
            let config = registry.config(agent_type)?;
            Ok(AgentSummary {
                agent_type: agent_type.to_string(),
                validator: config.validator.to_string(),
                validation_level: config.validation_level,
                confidence_threshold: config.thresholds.confidence,
                hallucination_threshold: config.thresholds.hallucination,
                critical_patterns: config.critical_patterns.len(),
                warning_patterns: config.warning_patterns.len(),
            })
        })
        .collect()
}

fn list_agents(config: Option<&Path>, json: bool) -> Result<()> {
    let agents = summarize(&load_registry(config)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:<9} {:>10} {:>13} {:>6}",
        "AGENT", "VALIDATOR", "LEVEL", "CONFIDENCE", "HALLUCINATION", "RULES"
    );
    for agent in agents {
        println!(
            "{:<16} {:<10} {:<9} {:>10.2} {:>13.2} {:>6}",
            agent.agent_type,
            agent.validator,
            agent.validation_level.as_str(),
            agent.confidence_threshold,
            agent.hallucination_threshold,
            agent.critical_patterns + agent.warning_patterns
        );
    }
    Ok(())
}

fn check_config(file: &Path) -> ExitCode {
    match ValidationConfigFile::from_path(file).and_then(|config| config.into_registry()) {
        Ok(registry) => {
            println!("{}: OK ({} agents)", file.display(), registry.len());
            ExitCode::SUCCESS
        }
        Err(ConfigError::Schema(errors)) => {
            eprintln!("{}: does not match schema", file.display());
            for error in errors {
                eprintln!("  - {}", error);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{}: {}", file.display(), e);
            ExitCode::FAILURE
        }
    }
}
