//! Single-step execution
//!
//! Every step runs in its own tokio task so a panicking stage only fails its
//! own step. Stage errors, timeouts, cancellation and missing registrations
//! all come back as a failed `ExecutionResult`, never as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::{StageContext, StageRegistry};
use crate::compiler::catalog;
use crate::compiler::ExecutionStep;
use crate::error::StageError;
use crate::types::ExecutionResult;
use crate::value::{Val, ValMap};

/// Spawns steps against a registry under a shared cancellation token
#[derive(Clone)]
pub(crate) struct StepRunner {
    pub registry: Arc<StageRegistry>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl StepRunner {
    pub fn spawn(&self, step: ExecutionStep) -> JoinHandle<ExecutionResult> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(step).await })
    }

    async fn run(self, step: ExecutionStep) -> ExecutionResult {
        let start = Instant::now();

        if self.cancel.is_cancelled() {
            return ExecutionResult::failed(
                step.step_id,
                StageError::Cancelled.to_string(),
                start.elapsed(),
            );
        }

        let Some(stage) = self.registry.get(&step.stage_name) else {
            warn!(step = %step.step_id, stage = %step.stage_name, "no stage registered");
            return ExecutionResult::failed(
                step.step_id,
                StageError::UnknownStage(step.stage_name).to_string(),
                start.elapsed(),
            );
        };

        let step_token = self.cancel.child_token();
        let ctx = StageContext {
            step_id: step.step_id.clone(),
            stage_id: step.stage_name.clone(),
            cancel: step_token.clone(),
        };

        debug!(step = %step.step_id, stage = %step.stage_name, "step running");

        let input = build_stage_input(&step);
        let call = stage.process(input, ctx);
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(StageError::TimedOut(limit))),
                None => call.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StageError::Cancelled),
            outcome = bounded => outcome,
        };

        let duration = start.elapsed();
        match outcome {
            Ok(value) => {
                debug!(step = %step.step_id, ?duration, "step succeeded");
                ExecutionResult::succeeded(step.step_id, value, duration)
            }
            Err(e) => {
                if matches!(e, StageError::TimedOut(_)) {
                    step_token.cancel();
                }
                warn!(step = %step.step_id, error = %e, "step failed");
                ExecutionResult::failed(step.step_id, e.to_string(), duration)
            }
        }
    }
}

/// Turn a joined step task into a result, failing the step if its task died
pub(crate) fn settle(
    step_id: &str,
    joined: Result<ExecutionResult, tokio::task::JoinError>,
) -> ExecutionResult {
    match joined {
        Ok(result) => result,
        Err(e) => {
            warn!(step = %step_id, error = %e, "step task aborted");
            ExecutionResult::failed(
                step_id,
                StageError::Aborted(e.to_string()).to_string(),
                Duration::ZERO,
            )
        }
    }
}

/// Build the input map handed to a step's stage.
///
/// Catalogued stages receive the parameters named in their input projection.
/// Unknown stages, or steps whose parameters match none of the projected
/// fields, receive a generic envelope instead.
pub fn build_stage_input(step: &ExecutionStep) -> ValMap {
    if let Some(profile) = catalog::profile(&step.stage_name) {
        let projected: ValMap = profile
            .input_fields
            .iter()
            .filter_map(|field| {
                step.parameters
                    .get(*field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect();
        if !projected.is_empty() {
            return projected;
        }
    }

    let r = step.resource_estimate;
    let resources: ValMap = [
        ("cpu", r.cpu),
        ("memory", r.memory),
        ("gpu", r.gpu),
        ("time", r.time),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), Val::Num(v)))
    .collect();

    let mut envelope = ValMap::new();
    envelope.insert("step_id".to_string(), Val::Str(step.step_id.clone()));
    envelope.insert("output_var".to_string(), Val::Str(step.output_var.clone()));
    envelope.insert("parameters".to_string(), Val::Obj(step.parameters.clone()));
    envelope.insert("resource_estimate".to_string(), Val::Obj(resources));
    envelope
}
