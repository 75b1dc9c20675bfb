//! Cardflow command-line runner.
//!
//! Validates, orders and runs workflow definitions without a user interface,
//! and exposes the parameter encoders for scripting.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardflow_engine::sandbox::ScriptSandbox;
use cardflow_engine::schema::AidConstruction;
use cardflow_engine::services::{NoInteraction, TokioProcessRunner};
use cardflow_engine::{
    AidBuilder, EngineConfig, ParameterDefinition, ParameterEncoder, Values, WorkflowBuilder,
    WorkflowDefinition, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "cardflowctl")]
#[command(version, about = "Cardflow workflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow for duplicate ids, unknown dependencies and cycles
    Validate {
        /// Workflow file (YAML or JSON)
        workflow: PathBuf,
    },

    /// Print the order in which a workflow's steps would run
    Order {
        /// Workflow file (YAML or JSON)
        workflow: PathBuf,
    },

    /// Run a workflow and print the JSON report
    ///
    /// Examples:
    ///     cardflowctl run install.yaml --headless --set pin=1234
    ///     cardflowctl run install.yaml --values answers.json
    #[command(verbatim_doc_comment)]
    Run {
        /// Workflow file (YAML or JSON)
        workflow: PathBuf,

        /// Set variables (format: key=value), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,

        /// Path to JSON file with initial values
        #[arg(long)]
        values: Option<PathBuf>,

        /// Resolve dialogs from supplied values instead of prompting
        #[arg(long)]
        headless: bool,
    },

    /// Encode install parameters from a parameter definition
    Encode {
        /// Parameter definition file (YAML or JSON)
        parameters: PathBuf,

        /// Set field values (format: key=value), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,
    },

    /// Assemble an AID from a construction definition
    Aid {
        /// AID construction file (YAML or JSON)
        construction: PathBuf,

        /// Set field values (format: key=value), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cardflow_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Validate { workflow } => {
            let engine = load_engine(&workflow, config)?;
            let errors = engine.validate();
            if errors.is_empty() {
                println!("Workflow is valid ({} steps)", engine.len());
            } else {
                for error in &errors {
                    eprintln!("Error: {}", error);
                }
                std::process::exit(1);
            }
        }
        Commands::Order { workflow } => {
            let engine = load_engine(&workflow, config)?;
            for (i, step_id) in engine.get_execution_order()?.iter().enumerate() {
                println!("{:>3}. {}", i + 1, step_id);
            }
        }
        Commands::Run {
            workflow,
            variables,
            values,
            headless,
        } => {
            let mut initial = match values {
                Some(path) => load_file::<Values>(&path)?,
                None => Values::new(),
            };
            initial.extend(parse_variables(&variables)?);

            let config = EngineConfig {
                headless: config.headless || headless,
                ..config
            };
            run_workflow(&workflow, config, initial).await?;
        }
        Commands::Encode {
            parameters,
            variables,
        } => {
            let definition: ParameterDefinition = load_file(&parameters)?;
            let encoder = ParameterEncoder::new(definition)
                .with_sandbox(ScriptSandbox::from_config(&config));
            let encoded = encoder
                .encode(&parse_variables(&variables)?)
                .context("Failed to encode parameters")?;
            println!("{}", serde_json::to_string_pretty(&encoded)?);
        }
        Commands::Aid {
            construction,
            variables,
        } => {
            let construction: AidConstruction = load_file(&construction)?;
            let aid = AidBuilder::build_from(&construction, &parse_variables(&variables)?)
                .context("Failed to build AID")?;
            println!("{}", aid);
        }
    }

    Ok(())
}

async fn run_workflow(path: &Path, config: EngineConfig, initial: Values) -> Result<()> {
    let engine = load_engine(path, config)?;
    let mut ctx = engine.new_context();
    ctx.register_process_runner(Arc::new(TokioProcessRunner::new()));
    ctx.register_input_provider(Arc::new(NoInteraction));

    let cancel = ctx.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Cancellation requested, stopping after the current step");
            cancel.cancel();
        }
    });

    tracing::info!(workflow = %path.display(), steps = engine.len(), "Running workflow");
    match engine.execute(&mut ctx, initial).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "error": e.to_string(),
                    "step_id": e.step_id(),
                }))?
            );
            Err(e.into())
        }
    }
}

fn load_engine(path: &Path, config: EngineConfig) -> Result<WorkflowEngine> {
    let definition: WorkflowDefinition = load_file(path)?;
    let engine = WorkflowBuilder::new()
        .with_config(config)
        .with_progress(Arc::new(|message: &str, percent: f64| {
            if percent < 0.0 {
                eprintln!("[....] {}", message);
            } else {
                eprintln!("[{:>3.0}%] {}", percent, message);
            }
        }))
        .build(&definition)
        .context(format!("Failed to build workflow from {:?}", path))?;
    Ok(engine)
}

/// Read a YAML or JSON file, chosen by extension.
fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).context(format!("Failed to read file: {:?}", path))?;
    parse_document(path, &content)
}

fn parse_document<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            serde_json::from_str(content).context(format!("Failed to parse JSON: {:?}", path))
        }
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(content).context(format!("Failed to parse YAML: {:?}", path))
        }
        _ => bail!("Unsupported file type: {:?} (expected .yaml, .yml or .json)", path),
    }
}

/// Parse `key=value` pairs. Values stay strings.
fn parse_variables(variables: &[String]) -> Result<Values> {
    let mut values = Values::new();
    for var in variables {
        match var.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                values.insert(key.to_string(), Value::String(value.to_string()));
            }
            _ => bail!("Invalid variable format '{}', expected key=value", var),
        }
    }
    Ok(values)
}
