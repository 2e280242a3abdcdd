//! Auxiliary planning artifacts
//!
//! Three documents derived once at compile time from the script and its
//! lowered steps:
//!
//! - **topology**: weighted step graph with one edge per resolved dependency
//! - **resource_plan**: per-step duration and resource needs plus the
//!   dependency map, mirrored into per-resource maps keyed by output variable
//! - **decision_plan**: per-step decision nodes, monitoring thresholds and the
//!   planning strategies available to the orchestrator
//!
//! All three are pure functions of their inputs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::compiler::catalog;
use crate::compiler::{ExecutionMode, ExecutionStep, ResourceAllocation};
use crate::parser::Script;
use crate::value::ValMap;

pub const TOPOLOGY: &str = "topology";
pub const RESOURCE_PLAN: &str = "resource_plan";
pub const DECISION_PLAN: &str = "decision_plan";

pub const FAILURE_POLICY: &str = "retry_with_fallback";
pub const DEFAULT_MIN_QUALITY: f64 = 0.7;
pub const DEFAULT_MAX_TIME: f64 = 60.0;

/* ===================== Topology ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub stage: String,
    pub line: usize,
    pub parameters: ValMap,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyArtifact {
    pub protocol: String,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

pub fn topology(protocol_name: &str, steps: &[ExecutionStep]) -> TopologyArtifact {
    let nodes = steps
        .iter()
        .map(|step| TopologyNode {
            id: step.step_id.clone(),
            stage: step.stage_name.clone(),
            line: step.source_line,
            parameters: step.parameters.clone(),
            weight: catalog::weight(&step.stage_name),
        })
        .collect();

    let edges = steps
        .iter()
        .flat_map(|step| {
            step.dependencies.iter().map(move |dep| TopologyEdge {
                from: dep.clone(),
                to: step.step_id.clone(),
                weight: 1.0,
            })
        })
        .collect();

    TopologyArtifact {
        protocol: protocol_name.to_string(),
        nodes,
        edges,
    }
}

/* ===================== Resource Plan ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResources {
    pub step_id: String,
    pub output_var: String,
    pub stage: String,
    pub estimated_duration: f64,
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePlanArtifact {
    pub protocol: String,
    pub execution_mode: ExecutionMode,
    pub allocation: ResourceAllocation,
    pub steps: Vec<StepResources>,
    /// Output variable to the output variables it waits for
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub cpu_requirements: BTreeMap<String, f64>,
    pub memory_requirements: BTreeMap<String, f64>,
    pub gpu_requirements: BTreeMap<String, f64>,
}

pub fn resource_plan(
    protocol_name: &str,
    steps: &[ExecutionStep],
    mode: ExecutionMode,
    allocation: &ResourceAllocation,
) -> ResourcePlanArtifact {
    let var_of: HashMap<&str, &str> = steps
        .iter()
        .map(|s| (s.step_id.as_str(), s.output_var.as_str()))
        .collect();

    let mut plan = ResourcePlanArtifact {
        protocol: protocol_name.to_string(),
        execution_mode: mode,
        allocation: allocation.clone(),
        steps: Vec::with_capacity(steps.len()),
        dependencies: BTreeMap::new(),
        cpu_requirements: BTreeMap::new(),
        memory_requirements: BTreeMap::new(),
        gpu_requirements: BTreeMap::new(),
    };

    for step in steps {
        let r = step.resource_estimate;
        plan.steps.push(StepResources {
            step_id: step.step_id.clone(),
            output_var: step.output_var.clone(),
            stage: step.stage_name.clone(),
            estimated_duration: r.time,
            cpu: r.cpu,
            memory: r.memory,
            gpu: r.gpu,
        });

        let deps = step
            .dependencies
            .iter()
            .filter_map(|id| var_of.get(id.as_str()).map(|v| v.to_string()))
            .collect();
        plan.dependencies.insert(step.output_var.clone(), deps);
        plan.cpu_requirements.insert(step.output_var.clone(), r.cpu);
        plan.memory_requirements.insert(step.output_var.clone(), r.memory);
        plan.gpu_requirements.insert(step.output_var.clone(), r.gpu);
    }

    plan
}

/* ===================== Decision Plan ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub stage: String,
    pub output_var: String,
    pub success_criterion: String,
    pub failure_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPolicy {
    pub metrics: Vec<String>,
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningStrategy {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPlanArtifact {
    pub protocol: String,
    pub decisions: Vec<DecisionNode>,
    pub monitoring: MonitoringPolicy,
    pub control_policies: Vec<String>,
    pub strategies: Vec<PlanningStrategy>,
}

pub fn decision_plan(protocol_name: &str, steps: &[ExecutionStep]) -> DecisionPlanArtifact {
    let decisions = steps
        .iter()
        .map(|step| DecisionNode {
            stage: step.stage_name.clone(),
            output_var: step.output_var.clone(),
            success_criterion: catalog::success_criterion(&step.stage_name).to_string(),
            failure_policy: FAILURE_POLICY.to_string(),
        })
        .collect();

    let monitoring = MonitoringPolicy {
        metrics: ["confidence", "quality", "duration", "error_rate"]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        thresholds: BTreeMap::from([
            ("min_quality".to_string(), DEFAULT_MIN_QUALITY),
            ("max_time".to_string(), DEFAULT_MAX_TIME),
        ]),
    };

    let control_policies = [
        "retry failed steps once with fallback parameters",
        "skip annotation for steps without a result",
        "escalate when quality stays below min_quality",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect();

    let strategies = [
        (
            "sequential",
            "run steps one at a time in source order",
        ),
        (
            "parallel_optimization",
            "launch every step whose dependencies are complete at once",
        ),
        (
            "resource_balancing",
            "cap summed cpu, memory and gpu demand of concurrent steps",
        ),
    ]
    .iter()
    .map(|(name, description)| PlanningStrategy {
        name: name.to_string(),
        description: description.to_string(),
    })
    .collect();

    DecisionPlanArtifact {
        protocol: protocol_name.to_string(),
        decisions,
        monitoring,
        control_policies,
        strategies,
    }
}

/* ===================== Bundle ===================== */

/// Derive all three artifacts and render them as pretty JSON documents
pub fn generate(
    script: &Script,
    steps: &[ExecutionStep],
    mode: ExecutionMode,
    allocation: &ResourceAllocation,
) -> BTreeMap<String, String> {
    let name = script.protocol_name.as_str();
    let mut bundle = BTreeMap::new();

    insert_rendered(&mut bundle, TOPOLOGY, &topology(name, steps));
    insert_rendered(
        &mut bundle,
        RESOURCE_PLAN,
        &resource_plan(name, steps, mode, allocation),
    );
    insert_rendered(&mut bundle, DECISION_PLAN, &decision_plan(name, steps));

    bundle
}

fn insert_rendered<T: Serialize>(bundle: &mut BTreeMap<String, String>, key: &str, artifact: &T) {
    match serde_json::to_string_pretty(artifact) {
        Ok(text) => {
            bundle.insert(key.to_string(), text);
        }
        Err(e) => warn!(artifact = key, error = %e, "failed to render artifact"),
    }
}
