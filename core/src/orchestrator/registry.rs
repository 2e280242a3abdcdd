//! Stage registry
//!
//! The orchestrator never looks inside a stage: each one is a single
//! `process(input) -> output` capability registered under its canonical id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::StageError;
use crate::value::ValMap;

/// Per-invocation context handed to a stage
#[derive(Debug, Clone)]
pub struct StageContext {
    pub step_id: String,
    pub stage_id: String,
    /// Cancelled when the run is cancelled or the step times out
    pub cancel: CancellationToken,
}

/// An external processing stage
#[async_trait]
pub trait Stage: Send + Sync {
    async fn process(&self, input: ValMap, ctx: StageContext) -> Result<ValMap, StageError>;
}

/// Canonical stage id to stage implementation
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage, replacing any stage already under `stage_id`
    pub fn register(&mut self, stage_id: impl Into<String>, stage: Arc<dyn Stage>) {
        self.stages.insert(stage_id.into(), stage);
    }

    pub fn with_stage(mut self, stage_id: impl Into<String>, stage: impl Stage + 'static) -> Self {
        self.register(stage_id, Arc::new(stage));
        self
    }

    pub fn get(&self, stage_id: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(stage_id).cloned()
    }

    pub fn contains(&self, stage_id: &str) -> bool {
        self.stages.contains_key(stage_id)
    }

    /// Registered ids, sorted
    pub fn stage_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.stage_ids())
            .finish()
    }
}

/* ===================== Adapters ===================== */

/// Stage backed by an async closure
pub struct FnStage<F> {
    func: F,
}

impl<F, Fut> FnStage<F>
where
    F: Fn(ValMap, StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ValMap, StageError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(ValMap, StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ValMap, StageError>> + Send + 'static,
{
    async fn process(&self, input: ValMap, ctx: StageContext) -> Result<ValMap, StageError> {
        (self.func)(input, ctx).await
    }
}

/// Stage that always returns the same output
#[derive(Debug, Clone)]
pub struct StaticStage {
    output: ValMap,
}

impl StaticStage {
    pub fn new(output: ValMap) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Stage for StaticStage {
    async fn process(&self, _input: ValMap, _ctx: StageContext) -> Result<ValMap, StageError> {
        Ok(self.output.clone())
    }
}
