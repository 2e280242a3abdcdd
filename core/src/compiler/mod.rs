//! Protocol compiler
//!
//! Lowers the stage calls of a parsed `Script` into `ExecutionStep`s, resolves
//! their dependencies into a step graph, picks the scheduling mode, sizes the
//! resource allocation and links every step back to its source line.
//!
//! Compilation is deterministic: the same script and options always yield
//! the same plan.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::artifacts;
use crate::error::{CompileError, CompileResult};
use crate::parser::{Node, Script};

pub mod catalog;
pub mod types;

pub use types::{
    AllocationStrategy, AnnotationEntry, CompiledProtocol, ExecutionMode, ExecutionStep,
    ResourceAllocation, ResourceEstimate,
};


/// Pattern for the summary line spliced under an annotated source line
pub const ANNOTATION_PATTERN: &str = "// RESULT: {var} = {result}";

/// Compiler options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Reject unresolved parameter references and duplicate outputs instead
    /// of dropping or shadowing them
    pub strict_dependencies: bool,
    /// Caps for the summed allocation of sequential and adaptive plans
    pub max_cpu: f64,
    pub max_memory: f64,
    pub max_gpu: f64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict_dependencies: false,
            max_cpu: 8.0,
            max_memory: 32.0,
            max_gpu: 2.0,
        }
    }
}

impl CompileOptions {
    pub fn strict() -> Self {
        Self {
            strict_dependencies: true,
            ..Self::default()
        }
    }
}

/// Derive the step id for an output variable
pub fn step_id(protocol_name: &str, output_var: &str) -> String {
    format!("{}_{}", protocol_name, output_var)
}

/// Compile a parsed script into an execution plan
pub fn compile(script: &Script, options: &CompileOptions) -> CompileResult<CompiledProtocol> {
    if options.strict_dependencies {
        check_duplicate_outputs(script)?;
    }

    let mut steps: Vec<ExecutionStep> = script
        .stage_calls
        .iter()
        .map(|node| lower(&script.protocol_name, node))
        .collect();

    resolve_dependencies(&script.stage_calls, &mut steps, options)?;

    let execution_mode = choose_mode(&steps);
    let resource_allocation = allocate(&steps, execution_mode, options);

    // Duplicate step ids shadow: the last step wins both maps
    let mut dependency_graph = BTreeMap::new();
    let mut annotation_map = BTreeMap::new();
    for step in &steps {
        dependency_graph.insert(step.step_id.clone(), step.dependencies.clone());
        annotation_map.insert(
            step.step_id.clone(),
            AnnotationEntry {
                line: step.source_line,
                var: step.output_var.clone(),
                pattern: ANNOTATION_PATTERN.to_string(),
            },
        );
    }

    let auxiliary_artifacts =
        artifacts::generate(script, &steps, execution_mode, &resource_allocation);

    info!(
        protocol = %script.protocol_name,
        steps = steps.len(),
        mode = %execution_mode,
        "compiled protocol"
    );

    Ok(CompiledProtocol {
        protocol_name: script.protocol_name.clone(),
        steps,
        execution_mode,
        resource_allocation,
        dependency_graph,
        annotation_map,
        auxiliary_artifacts,
        source: script.source.clone(),
        source_hash: hash_source(&script.source),
    })
}

/* ===================== Lowering ===================== */

fn lower(protocol_name: &str, node: &Node) -> ExecutionStep {
    let output_var = node.output().unwrap_or_default().to_string();
    let stage_name = catalog::canonical_stage(node.stage_name().unwrap_or_default()).to_string();

    ExecutionStep {
        step_id: step_id(protocol_name, &output_var),
        resource_estimate: catalog::resource_estimate(&stage_name),
        annotation_template: ANNOTATION_PATTERN.replace("{var}", &output_var),
        stage_name,
        parameters: node.parameters().cloned().unwrap_or_default(),
        dependencies: Vec::new(),
        source_line: node.line_number,
        output_var,
    }
}

fn check_duplicate_outputs(script: &Script) -> CompileResult<()> {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for node in &script.stage_calls {
        let Some(output) = node.output() else {
            continue;
        };
        if let Some(first_line) = first_seen.get(output) {
            return Err(CompileError::DuplicateOutput {
                output: output.to_string(),
                line: node.line_number,
                first_line: *first_line,
            });
        }
        first_seen.insert(output, node.line_number);
    }
    Ok(())
}

/* ===================== Dependency Resolution ===================== */

fn resolve_dependencies(
    nodes: &[Node],
    steps: &mut [ExecutionStep],
    options: &CompileOptions,
) -> CompileResult<()> {
    // Later outputs shadow earlier ones with the same name
    let output_to_step: HashMap<String, String> = steps
        .iter()
        .map(|s| (s.output_var.clone(), s.step_id.clone()))
        .collect();

    for (node, step) in nodes.iter().zip(steps.iter_mut()) {
        let mut resolved: Vec<String> = Vec::new();

        for name in &node.dependencies {
            match output_to_step.get(name) {
                Some(dep_id) => {
                    if !resolved.contains(dep_id) {
                        resolved.push(dep_id.clone());
                    }
                }
                None if options.strict_dependencies && Some(name.as_str()) != node.stage_name() => {
                    return Err(CompileError::UnresolvedDependency {
                        step_id: step.step_id.clone(),
                        name: name.clone(),
                        line: node.line_number,
                    });
                }
                None => {
                    debug!(step = %step.step_id, name = %name, "dropping unresolved dependency");
                }
            }
        }

        step.dependencies = resolved;
    }

    Ok(())
}

/* ===================== Mode & Allocation ===================== */

/// Pick the scheduling mode from the resolved dependency lists
pub fn choose_mode(steps: &[ExecutionStep]) -> ExecutionMode {
    let independent = steps.iter().filter(|s| s.dependencies.is_empty()).count();

    if independent == 0 {
        ExecutionMode::Sequential
    } else if independent == steps.len() {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Adaptive
    }
}

/// Size the aggregate allocation for a plan.
///
/// Parallel plans report the largest single-step demand per resource. The
/// other modes sum per-resource demand and cap it.
pub fn allocate(
    steps: &[ExecutionStep],
    mode: ExecutionMode,
    options: &CompileOptions,
) -> ResourceAllocation {
    let total_time = steps.iter().map(|s| s.resource_estimate.time).sum();
    let step_count = steps.len();

    match mode {
        ExecutionMode::Parallel => {
            let peak = |f: fn(&ResourceEstimate) -> f64| {
                steps
                    .iter()
                    .map(|s| f(&s.resource_estimate))
                    .fold(0.0, f64::max)
            };
            ResourceAllocation {
                strategy: AllocationStrategy::Peak,
                cpu: peak(|r| r.cpu),
                memory: peak(|r| r.memory),
                gpu: peak(|r| r.gpu),
                total_time,
                step_count,
            }
        }
        ExecutionMode::Sequential | ExecutionMode::Adaptive => {
            let sum = |f: fn(&ResourceEstimate) -> f64| {
                steps.iter().map(|s| f(&s.resource_estimate)).sum::<f64>()
            };
            ResourceAllocation {
                strategy: AllocationStrategy::CappedSum,
                cpu: sum(|r| r.cpu).min(options.max_cpu),
                memory: sum(|r| r.memory).min(options.max_memory),
                gpu: sum(|r| r.gpu).min(options.max_gpu),
                total_time,
                step_count,
            }
        }
    }
}

fn hash_source(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}
