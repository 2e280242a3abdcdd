//! Protoflow core
//!
//! A small line-oriented scripting language for protocols built from calls
//! into external processing stages. Scripts are parsed into nodes, compiled
//! into an execution plan with a dependency graph and resource estimate, run
//! by the orchestrator under a parallel, sequential or adaptive strategy, and
//! finally annotated with per-step result summaries.

pub mod artifacts;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod stats;
pub mod types;
pub mod validator;
pub mod value;

pub use compiler::{compile, CompileOptions, CompiledProtocol, ExecutionMode, ExecutionStep};
pub use error::{CompileError, StageError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Stage, StageContext, StageRegistry};
pub use parser::{parse_script, Node, NodeKind, Script};
pub use stats::{ExecutionStats, InMemoryStats, StatsService};
pub use types::*;
pub use value::{Val, ValMap};
