//! Compiled protocol types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::value::ValMap;

/// Static per-step resource demand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub cpu: f64,
    /// Memory in GB
    pub memory: f64,
    pub gpu: f64,
    /// Estimated wall time in seconds
    pub time: f64,
}

/// Scheduling strategy chosen at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every step is gated on another step
    Sequential,
    /// No step depends on another
    Parallel,
    /// Mixed: wavefront execution over the dependency graph
    Adaptive,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Sequential => "SEQUENTIAL",
            ExecutionMode::Parallel => "PARALLEL",
            ExecutionMode::Adaptive => "ADAPTIVE",
        };
        write!(f, "{}", name)
    }
}

/// How the aggregate allocation was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Per-resource maximum over all steps
    Peak,
    /// Per-resource sum, capped
    CappedSum,
}

/// Aggregate resource allocation for a compiled protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub strategy: AllocationStrategy,
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
    /// Sum of per-step time estimates, in seconds
    pub total_time: f64,
    pub step_count: usize,
}

/// Compiled form of one stage-call node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: String,
    /// Canonical stage identifier
    pub stage_name: String,
    pub output_var: String,
    pub parameters: ValMap,
    /// Resolved step ids this step waits for
    pub dependencies: Vec<String>,
    pub resource_estimate: ResourceEstimate,
    pub source_line: usize,
    pub annotation_template: String,
}

/// Links a step back to the source line its result summary goes under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    pub line: usize,
    pub var: String,
    pub pattern: String,
}

/// Output of the protocol compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProtocol {
    pub protocol_name: String,
    pub steps: Vec<ExecutionStep>,
    pub execution_mode: ExecutionMode,
    pub resource_allocation: ResourceAllocation,
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    pub annotation_map: BTreeMap<String, AnnotationEntry>,
    pub auxiliary_artifacts: BTreeMap<String, String>,
    /// Script text the protocol was compiled from
    pub source: String,
    /// SHA-256 of `source`, hex encoded
    pub source_hash: String,
}

impl CompiledProtocol {
    pub fn step(&self, step_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}
