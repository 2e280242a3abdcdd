use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::compiler::ExecutionMode;
use crate::value::ValMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Compiled,
    Running,
    Completed,
    CompileFailed,
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionResult {
    pub step_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ValMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn succeeded(step_id: impl Into<String>, value: ValMap, duration: Duration) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            value: Some(value),
            error: None,
            duration,
        }
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            value: None,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn state(&self) -> StepState {
        if self.success {
            StepState::Succeeded
        } else {
            StepState::Failed
        }
    }
}

/// Outcome of a whole protocol run
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolExecutionResult {
    pub run_id: String,
    pub protocol_name: String,
    pub state: ProtocolState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    /// Scheduling loop iterations of an adaptive run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling_rounds: Option<usize>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub step_results: Vec<ExecutionResult>,
    pub annotated_script: String,
    pub auxiliary_artifacts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProtocolExecutionResult {
    pub fn result(&self, step_id: &str) -> Option<&ExecutionResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.step_results.iter().filter(|r| !r.success)
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
