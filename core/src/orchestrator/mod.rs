//! Protocol orchestrator
//!
//! Runs a `CompiledProtocol` against a `StageRegistry` using the protocol's
//! scheduling mode:
//!
//! - PARALLEL launches every step at once.
//! - SEQUENTIAL runs steps one after another in plan order.
//! - ADAPTIVE runs waves of steps whose dependencies have all completed.
//!
//! A step failure never aborts the run. It is recorded in the step's result
//! and the run keeps going. The only run-level error is a compile failure
//! from `run_script`.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compiler::{self, CompileOptions, CompiledProtocol, ExecutionMode, ExecutionStep};
use crate::parser::parse_script;
use crate::stats::{InMemoryStats, StatsService};
use crate::types::{ExecutionResult, ProtocolExecutionResult, ProtocolState, StepState};

pub mod annotate;
pub mod registry;
mod step;

pub use annotate::{annotate_script, summarize};
pub use registry::{FnStage, Stage, StageContext, StageRegistry, StaticStage};
pub use step::build_stage_input;

use step::{settle, StepRunner};

#[cfg(test)]
mod tests;

/// Error recorded for steps an adaptive run can never start
pub const DEADLOCK_ERROR: &str = "circular dependency or unresolved dependency";

/// Orchestrator options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-step time limit; unbounded when unset
    pub step_timeout_secs: Option<u64>,
    /// In adaptive runs, fail a step whose dependency failed instead of
    /// running it
    pub gate_on_success: bool,
    /// Force a scheduling mode regardless of what the compiler chose
    pub mode_override: Option<ExecutionMode>,
}

pub struct Orchestrator {
    runner: StepRunner,
    stats: Arc<dyn StatsService>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            runner: StepRunner {
                registry: Arc::new(registry),
                timeout: None,
                cancel: CancellationToken::new(),
            },
            stats: Arc::new(InMemoryStats::new()),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsService>) -> Self {
        self.stats = stats;
        self
    }

    /// Apply `config`. A timeout set earlier through `with_step_timeout` is
    /// kept unless the config sets one of its own.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        if let Some(secs) = config.step_timeout_secs {
            self.runner.timeout = Some(Duration::from_secs(secs));
        }
        self.config = config;
        self
    }

    /// Set the per-step timeout directly, with sub-second precision
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.runner.timeout = Some(timeout);
        self
    }

    /// Token that cancels every current and future run of this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.runner.cancel.clone()
    }

    pub fn stats(&self) -> Arc<dyn StatsService> {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.runner.registry
    }

    /// Parse, compile and execute a script in one go.
    ///
    /// A compile failure yields a `CompileFailed` result with no step
    /// results; it still counts as a failed run in the statistics.
    pub async fn run_script(
        &self,
        source: &str,
        protocol_name: &str,
        options: &CompileOptions,
    ) -> ProtocolExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let script = parse_script(source, protocol_name);

        match compiler::compile(&script, options) {
            Ok(protocol) => self.execute(&protocol).await,
            Err(e) => {
                error!(protocol = %protocol_name, error = %e, "compilation failed");
                let duration = start.elapsed();
                self.stats.record(false, duration);
                ProtocolExecutionResult {
                    run_id: Uuid::new_v4().to_string(),
                    protocol_name: protocol_name.to_string(),
                    state: ProtocolState::CompileFailed,
                    execution_mode: None,
                    scheduling_rounds: None,
                    success: false,
                    started_at,
                    duration,
                    step_results: Vec::new(),
                    annotated_script: source.to_string(),
                    auxiliary_artifacts: Default::default(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Execute a compiled protocol.
    ///
    /// Always returns one result per step, in plan order. The run succeeds
    /// only if every step succeeded.
    pub async fn execute(&self, protocol: &CompiledProtocol) -> ProtocolExecutionResult {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let mode = self.config.mode_override.unwrap_or(protocol.execution_mode);

        info!(
            run_id = %run_id,
            protocol = %protocol.protocol_name,
            mode = %mode,
            steps = protocol.steps.len(),
            "protocol run started"
        );

        let (step_results, scheduling_rounds) = match mode {
            ExecutionMode::Parallel => (self.run_parallel(&protocol.steps).await, None),
            ExecutionMode::Sequential => (self.run_sequential(&protocol.steps).await, None),
            ExecutionMode::Adaptive => {
                let (results, rounds) = self.run_adaptive(&protocol.steps).await;
                (results, Some(rounds))
            }
        };

        let success = step_results.iter().all(|r| r.success);
        let annotated_script =
            annotate_script(&protocol.source, &protocol.annotation_map, &step_results);
        let duration = start.elapsed();
        self.stats.record(success, duration);

        let failed = step_results.iter().filter(|r| !r.success).count();
        info!(
            run_id = %run_id,
            protocol = %protocol.protocol_name,
            success,
            failed,
            ?duration,
            "protocol run completed"
        );

        ProtocolExecutionResult {
            run_id,
            protocol_name: protocol.protocol_name.clone(),
            state: ProtocolState::Completed,
            execution_mode: Some(mode),
            scheduling_rounds,
            success,
            started_at,
            duration,
            step_results,
            annotated_script,
            auxiliary_artifacts: protocol.auxiliary_artifacts.clone(),
            error: None,
        }
    }

    /* ===================== Strategies ===================== */

    async fn run_parallel(&self, steps: &[ExecutionStep]) -> Vec<ExecutionResult> {
        let handles: Vec<_> = steps.iter().map(|s| self.runner.spawn(s.clone())).collect();
        let joined = join_all(handles).await;

        steps
            .iter()
            .zip(joined)
            .map(|(s, j)| settle(&s.step_id, j))
            .collect()
    }

    async fn run_sequential(&self, steps: &[ExecutionStep]) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let result = settle(&step.step_id, self.runner.spawn(step.clone()).await);
            if !result.success {
                debug!(step = %step.step_id, "continuing after failed step");
            }
            results.push(result);
        }
        results
    }

    /// Returns the step results and the number of scheduling rounds, which
    /// never exceeds `steps.len() + 1`.
    async fn run_adaptive(&self, steps: &[ExecutionStep]) -> (Vec<ExecutionResult>, usize) {
        let mut states = vec![StepState::Pending; steps.len()];
        let mut results: Vec<Option<ExecutionResult>> = vec![None; steps.len()];

        // A shadowed output id belongs to the last step that produces it
        let owners: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.step_id.as_str(), i))
            .collect();

        // Completion, not success, unblocks dependents
        let mut completed: HashSet<&str> = HashSet::new();
        let mut failed: HashSet<&str> = HashSet::new();
        let mut rounds = 0usize;

        loop {
            rounds += 1;
            let pending: Vec<usize> = (0..steps.len())
                .filter(|&i| states[i] == StepState::Pending)
                .collect();
            if pending.is_empty() {
                break;
            }

            let ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&i| {
                    steps[i]
                        .dependencies
                        .iter()
                        .all(|d| completed.contains(d.as_str()))
                })
                .collect();

            if ready.is_empty() {
                warn!(remaining = pending.len(), "no runnable steps left");
                for i in pending {
                    states[i] = StepState::Failed;
                    results[i] = Some(ExecutionResult::failed(
                        steps[i].step_id.as_str(),
                        DEADLOCK_ERROR,
                        Duration::ZERO,
                    ));
                }
                break;
            }

            let mut launch = Vec::with_capacity(ready.len());
            for &i in &ready {
                let gate = self
                    .config
                    .gate_on_success
                    .then(|| {
                        steps[i]
                            .dependencies
                            .iter()
                            .find(|d| failed.contains(d.as_str()))
                    })
                    .flatten();

                match gate {
                    Some(dep) => {
                        debug!(step = %steps[i].step_id, dependency = %dep, "skipping gated step");
                        states[i] = StepState::Failed;
                        results[i] = Some(ExecutionResult::failed(
                            steps[i].step_id.as_str(),
                            format!("dependency '{}' failed", dep),
                            Duration::ZERO,
                        ));
                    }
                    None => {
                        states[i] = StepState::Running;
                        launch.push(i);
                    }
                }
            }

            debug!(round = rounds, steps = launch.len(), "launching wave");
            let handles: Vec<_> = launch
                .iter()
                .map(|&i| self.runner.spawn(steps[i].clone()))
                .collect();
            let joined = join_all(handles).await;

            for (&i, j) in launch.iter().zip(joined) {
                let result = settle(&steps[i].step_id, j);
                states[i] = result.state();
                results[i] = Some(result);
            }

            for &i in &ready {
                let id = steps[i].step_id.as_str();
                if owners.get(id) != Some(&i) {
                    continue;
                }
                completed.insert(id);
                if states[i] == StepState::Failed {
                    failed.insert(id);
                }
            }
        }

        debug!(rounds, "adaptive run finished");
        (results.into_iter().flatten().collect(), rounds)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.runner.registry)
            .field("config", &self.config)
            .finish()
    }
}
