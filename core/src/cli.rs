use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::compiler::{self, catalog, CompileOptions, CompiledProtocol};
use crate::config::Config;
use crate::orchestrator::{Orchestrator, StageRegistry, StaticStage};
use crate::parser::{parse_script, Script};
use crate::validator::validate_script;
use crate::value::Val;

#[derive(Parser)]
#[command(name = "protoflow")]
#[command(about = "Protoflow - parse, plan and run protocol scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Protocol name (default: the script's file stem)
    #[arg(long, global = true)]
    pub name: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Report diagnostics for a script
    Check {
        /// Script file
        file: PathBuf,
    },

    /// Print the parsed script as JSON
    Parse {
        /// Script file
        file: PathBuf,
    },

    /// Print the compiled execution plan as JSON
    Compile {
        /// Script file
        file: PathBuf,

        /// Reject unresolved references and duplicate outputs
        #[arg(long)]
        strict: bool,
    },

    /// Write the topology, resource plan and decision plan documents
    Artifacts {
        /// Script file
        file: PathBuf,

        /// Directory to write `<name>.<artifact>.json` files into
        #[arg(short = 'o', long = "out-dir", default_value = ".")]
        out_dir: PathBuf,
    },

    /// Execute a script against canned stage responses
    Run {
        /// Script file
        file: PathBuf,

        /// JSON object mapping stage names to the output each stage returns
        #[arg(short = 'r', long = "responses")]
        responses: PathBuf,

        /// Print the full execution report as JSON instead of the annotated script
        #[arg(long)]
        json: bool,

        /// Per-step timeout in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with explicit arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load config before any command output so config errors show first
    let config = Config::builder()
        .config_path(cli.config.clone())
        .build()?;
    init_tracing(&config.logging.filter);

    match cli.command {
        Commands::Check { file } => {
            let script = load_script(&file, cli.name.as_deref())?;
            let diagnostics = validate_script(&script);

            for diagnostic in &diagnostics {
                println!("{}:{}", file.display(), diagnostic);
            }

            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            if errors > 0 {
                bail!("{} error(s) in {}", errors, file.display());
            }
            println!(
                "✓ {}: {} stage call(s), {} warning(s)/hint(s)",
                file.display(),
                script.stage_calls.len(),
                diagnostics.len()
            );
        }

        Commands::Parse { file } => {
            let script = load_script(&file, cli.name.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&script)?);
        }

        Commands::Compile { file, strict } => {
            let script = load_script(&file, cli.name.as_deref())?;
            let options = CompileOptions {
                strict_dependencies: strict || config.compiler.strict_dependencies,
                ..config.compiler.clone()
            };
            let protocol = compile_script(&script, &options)?;
            println!("{}", serde_json::to_string_pretty(&protocol)?);
        }

        Commands::Artifacts { file, out_dir } => {
            let script = load_script(&file, cli.name.as_deref())?;
            let protocol = compile_script(&script, &config.compiler)?;

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;

            for (key, document) in &protocol.auxiliary_artifacts {
                let path = out_dir.join(format!("{}.{}.json", protocol.protocol_name, key));
                std::fs::write(&path, document)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("✓ Wrote {}", path.display());
            }
        }

        Commands::Run {
            file,
            responses,
            json,
            timeout,
        } => {
            let source = read_file(&file)?;
            let name = protocol_name(&file, cli.name.as_deref());

            let raw = read_file(&responses)?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", responses.display()))?;
            let registry = registry_from_responses(&value)?;

            let mut orchestrator_config = config.orchestrator.clone();
            if timeout.is_some() {
                orchestrator_config.step_timeout_secs = timeout;
            }
            let orchestrator = Orchestrator::new(registry).with_config(orchestrator_config);

            // Ctrl-C cancels the run; unfinished steps are reported as cancelled
            let token = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });

            let result = orchestrator
                .run_script(&source, &name, &config.compiler)
                .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.annotated_script);
            }

            if let Some(error) = &result.error {
                bail!("{}", error);
            }
            let failed = result.failed_steps().count();
            if failed > 0 {
                bail!(
                    "{} of {} step(s) failed",
                    failed,
                    result.step_results.len()
                );
            }
        }
    }

    Ok(())
}

/// Install the stderr subscriber; `RUST_LOG` wins over the configured filter
fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_script(path: &Path, name: Option<&str>) -> Result<Script> {
    let source = read_file(path)?;
    Ok(parse_script(&source, &protocol_name(path, name)))
}

fn compile_script(script: &Script, options: &CompileOptions) -> Result<CompiledProtocol> {
    compiler::compile(script, options)
        .with_context(|| format!("Failed to compile protocol '{}'", script.protocol_name))
}

fn protocol_name(path: &Path, name: Option<&str>) -> String {
    name.map(str::to_string)
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "protocol".to_string())
}

/// Build a registry of canned stages from `{"stage": {...output...}}`.
///
/// Stage names may be aliases; they are registered under the canonical id.
fn registry_from_responses(value: &serde_json::Value) -> Result<StageRegistry> {
    let entries = value
        .as_object()
        .ok_or_else(|| anyhow!("responses must be a JSON object keyed by stage name"))?;

    let mut registry = StageRegistry::new();
    for (stage, output) in entries {
        let Val::Obj(output) = Val::from_json(output) else {
            bail!("response for stage '{}' must be a JSON object", stage);
        };
        registry.register(
            catalog::canonical_stage(stage),
            std::sync::Arc::new(StaticStage::new(output)),
        );
    }
    Ok(registry)
}
