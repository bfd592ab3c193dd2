//! Command-line interface for panel-rs

mod demo;
mod report;
mod roles;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use panel_core::{Definition, ExecutionOptions, ExecutionStatus, Priority};
use panel_utils::Config;
use panel_workflow::{EngineConfig, TracingListener, WorkflowEngine};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::roles::ScriptedRoles;

#[derive(Parser, Debug)]
#[command(name = "panel")]
#[command(about = "Run analyst panel workflows", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a definition loaded from a JSON file
    Run {
        /// Definition file
        #[arg(short, long)]
        definition: PathBuf,

        /// Input entries as key=value; values are parsed as JSON when possible
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Scripted role answers; the demo answers are used when omitted
        #[arg(short, long)]
        roles: Option<PathBuf>,

        /// Wall-clock budget in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },

    /// Run the built-in analyst panel against scripted roles
    Demo {
        #[arg(short, long, default_value = "AAPL")]
        symbol: String,

        /// Confidence the panel must reach before it announces a result
        #[arg(long, default_value_t = 0.6)]
        threshold: f64,
    },

    /// Validate a definition file without running it
    Validate {
        #[arg(short, long)]
        definition: PathBuf,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Self::Low,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::High => Self::High,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    panel_utils::init_tracing_with(config.log_format)?;

    let args = Args::parse();
    info!(app = %config.app_name, environment = %config.environment, "Starting panel-cli");

    match args.command {
        Command::Run {
            definition,
            inputs,
            roles,
            timeout,
            priority,
        } => {
            let roles = match roles {
                Some(path) => ScriptedRoles::from_file(&path)
                    .with_context(|| format!("failed to load roles from {}", path.display()))?,
                None => ScriptedRoles::demo(),
            };
            let mut options = ExecutionOptions::default().with_priority(priority.into());
            if let Some(secs) = timeout {
                options = options.with_timeout(Duration::from_secs(secs));
            }
            run(load_definition(&definition)?, parse_inputs(&inputs)?, roles, options).await
        }
        Command::Demo { symbol, threshold } => {
            let mut input = Map::new();
            input.insert("symbol".to_string(), Value::String(symbol));
            input.insert("threshold".to_string(), threshold.into());
            run(
                demo::definition(),
                input,
                ScriptedRoles::demo(),
                ExecutionOptions::default(),
            )
            .await
        }
        Command::Validate { definition } => {
            let definition = load_definition(&definition)?;
            let engine = build_engine(ScriptedRoles::demo())?;
            let issues = engine.validate(&definition);
            if issues.is_empty() {
                println!("Definition '{}' is valid", definition.id);
                Ok(())
            } else {
                for issue in issues.issues() {
                    println!("  - {issue}");
                }
                bail!("definition '{}' has {} issue(s)", definition.id, issues.len())
            }
        }
    }
}

fn build_engine(roles: ScriptedRoles) -> anyhow::Result<WorkflowEngine> {
    let config = EngineConfig::default().with_env_overrides()?;
    let engine = WorkflowEngine::builder()
        .config(config)
        .roles(Arc::new(roles))
        .listener(Arc::new(TracingListener))
        .build()?;
    Ok(engine)
}

async fn run(
    definition: Definition,
    input: Map<String, Value>,
    roles: ScriptedRoles,
    options: ExecutionOptions,
) -> anyhow::Result<()> {
    let engine = build_engine(roles)?;
    let definition_id = definition.id.clone();
    engine.register(definition)?;
    engine.activate(&definition_id)?;

    let execution_id = engine.submit(&definition_id, input, options)?;
    let execution = engine.wait(&execution_id).await?;

    println!("{}", report::summary(&execution));
    println!("{}", report::node_table(&execution));
    if let Some(output) = &execution.output {
        println!("{}", serde_json::to_string_pretty(output)?);
    }

    if execution.status != ExecutionStatus::Completed {
        bail!("execution finished as {}", execution.status);
    }
    Ok(())
}

fn load_definition(path: &Path) -> anyhow::Result<Definition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid definition in {}", path.display()))
}

/// Parse `key=value` pairs; values that are not valid JSON are kept as strings
fn parse_inputs(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut input = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("input '{pair}' is not KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("input '{pair}' has an empty key");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        input.insert(key.to_string(), value);
    }
    Ok(input)
}
