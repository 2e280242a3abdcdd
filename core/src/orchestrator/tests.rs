use super::*;
use crate::compiler::compile;
use crate::error::StageError;
use crate::stats::ExecutionStats;
use crate::value::{Val, ValMap};
use async_trait::async_trait;
use maplit::btreemap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const DIAMOND: &str = r#"a = stage_call("query", query="x")
b = stage_call("reasoning", context=a)
c = stage_call("knowledge", query=a)
d = stage_call("evaluator", target=b, reference=c)
"#;

fn compile_source(source: &str, name: &str) -> CompiledProtocol {
    compile(&parse_script(source, name), &CompileOptions::default()).unwrap()
}

fn ok_stage() -> StaticStage {
    StaticStage::new(ValMap::new())
}

fn failing_stage(msg: &'static str) -> impl Stage {
    FnStage::new(move |_, _| async move { Err::<ValMap, _>(StageError::failed(msg)) })
}

/// Records the step id of every invocation, in start order
fn recording_stage(log: Arc<Mutex<Vec<String>>>) -> impl Stage {
    FnStage::new(move |_, ctx: StageContext| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(ctx.step_id);
            tokio::task::yield_now().await;
            Ok::<_, StageError>(ValMap::new())
        }
    })
}

/// Logs `start <label>` and `end <label>` around a short sleep
fn timed_stage(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> impl Stage {
    FnStage::new(move |_, _| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(format!("start {}", label));
            tokio::time::sleep(Duration::from_millis(20)).await;
            log.lock().unwrap().push(format!("end {}", label));
            Ok::<_, StageError>(ValMap::new())
        }
    })
}

fn sleeping_stage(secs: u64) -> impl Stage {
    FnStage::new(move |_, _| async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok::<_, StageError>(ValMap::new())
    })
}

struct PanickingStage;

#[async_trait]
impl Stage for PanickingStage {
    async fn process(&self, _input: ValMap, _ctx: StageContext) -> Result<ValMap, StageError> {
        panic!("stage blew up")
    }
}

/* ===================== End to End ===================== */

#[tokio::test]
async fn test_single_step_is_annotated() {
    let source = "q = stage_call(\"query_processor\", query=\"x\")\n";
    let registry = StageRegistry::new().with_stage(
        "query_processor",
        StaticStage::new(btreemap! { "confidence".to_string() => Val::Num(0.9) }),
    );

    let result = Orchestrator::new(registry)
        .run_script(source, "demo", &CompileOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.state, ProtocolState::Completed);
    assert_eq!(result.execution_mode, Some(ExecutionMode::Parallel));
    assert_eq!(result.step_results.len(), 1);
    assert_eq!(result.step_results[0].step_id, "demo_q");
    assert_eq!(
        result.annotated_script,
        "q = stage_call(\"query_processor\", query=\"x\")\n// RESULT: q = {confidence: 0.900}\n"
    );
    assert_eq!(result.auxiliary_artifacts.len(), 3);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_stage_receives_projected_input() {
    let seen: Arc<Mutex<Option<ValMap>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen);
    let registry = StageRegistry::new().with_stage(
        "query_processor",
        FnStage::new(move |input: ValMap, _| {
            let capture = Arc::clone(&capture);
            async move {
                *capture.lock().unwrap() = Some(input);
                Ok::<_, StageError>(ValMap::new())
            }
        }),
    );

    let protocol = compile_source(r#"q = stage_call("query", query="x", depth=2)"#, "p");
    Orchestrator::new(registry).execute(&protocol).await;

    assert_eq!(
        *seen.lock().unwrap(),
        Some(btreemap! { "query".to_string() => Val::Str("x".to_string()) })
    );
}

#[test]
fn test_stage_input_envelope_fallback() {
    let protocol = compile_source(r#"r = stage_call("reasoning", premise="p")"#, "p");
    let input = build_stage_input(&protocol.steps[0]);

    let keys: Vec<&str> = input.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["output_var", "parameters", "resource_estimate", "step_id"]
    );
    assert_eq!(input["step_id"], Val::Str("p_r".to_string()));
    assert_eq!(
        input["resource_estimate"].as_obj().and_then(|r| r.get("gpu")),
        Some(&Val::Num(1.0))
    );
}

/* ===================== Strategies ===================== */

#[tokio::test]
async fn test_parallel_failure_is_isolated() {
    let source = "a = stage_call(\"query\", query=\"x\")\nb = stage_call(\"reasoning\", context=\"y\")\n";
    let registry = StageRegistry::new()
        .with_stage("query_processor", ok_stage())
        .with_stage("reasoning_engine", failing_stage("boom"));

    let protocol = compile_source(source, "p");
    assert_eq!(protocol.execution_mode, ExecutionMode::Parallel);
    let result = Orchestrator::new(registry).execute(&protocol).await;

    assert!(!result.success);
    assert_eq!(result.step_results.len(), 2);
    assert!(result.result("p_a").unwrap().success);

    let b = result.result("p_b").unwrap();
    assert_eq!(b.state(), StepState::Failed);
    assert_eq!(b.error.as_deref(), Some("boom"));
    assert!(result
        .annotated_script
        .contains("// RESULT: b = {error: boom}"));
    assert_eq!(result.failed_steps().count(), 1);
}

#[tokio::test]
async fn test_adaptive_runs_in_waves() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StageRegistry::new();
    for stage in [
        "query_processor",
        "reasoning_engine",
        "knowledge_extractor",
        "response_evaluator",
    ] {
        registry.register(stage, Arc::new(recording_stage(Arc::clone(&log))));
    }

    let protocol = compile_source(DIAMOND, "dia");
    assert_eq!(protocol.execution_mode, ExecutionMode::Adaptive);
    let result = Orchestrator::new(registry).execute(&protocol).await;

    assert!(result.success);
    let order = log.lock().unwrap().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "dia_a");
    let mut middle = order[1..3].to_vec();
    middle.sort();
    assert_eq!(middle, vec!["dia_b", "dia_c"]);
    assert_eq!(order[3], "dia_d");

    // Results stay in plan order whatever the completion order
    let ids: Vec<&str> = result.step_results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(ids, vec!["dia_a", "dia_b", "dia_c", "dia_d"]);

    // Three waves plus the round that finds nothing left
    assert_eq!(result.scheduling_rounds, Some(4));
}

#[tokio::test]
async fn test_adaptive_waits_for_last_producer_of_shadowed_output() {
    let source = r#"w = stage_call("query", query="x")
x = stage_call("knowledge", query="k")
x = stage_call("score", target=w)
y = stage_call("reasoning", context=x)
"#;
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = StageRegistry::new()
        .with_stage("query_processor", timed_stage("query", Arc::clone(&log)))
        .with_stage("knowledge_extractor", timed_stage("knowledge", Arc::clone(&log)))
        .with_stage("response_scorer", timed_stage("score", Arc::clone(&log)))
        .with_stage("reasoning_engine", timed_stage("reasoning", Arc::clone(&log)));

    let protocol = compile_source(source, "p");
    assert_eq!(protocol.execution_mode, ExecutionMode::Adaptive);
    assert_eq!(protocol.step("p_y").unwrap().dependencies, vec!["p_x"]);

    let result = Orchestrator::new(registry).execute(&protocol).await;
    assert!(result.success);
    assert_eq!(result.step_results.len(), 4);

    let events = log.lock().unwrap().clone();
    let at = |event: &str| events.iter().position(|e| e == event).unwrap();
    assert!(
        at("start reasoning") > at("end score"),
        "reasoning started before the shadowing score step ended: {:?}",
        events
    );
    assert!(at("start score") > at("end query"));

    // {w, first x}, {second x}, {y}, then the empty round
    assert_eq!(result.scheduling_rounds, Some(4));
}

#[tokio::test]
async fn test_sequential_runs_in_plan_order() {
    let ring = r#"a = stage_call("query", query=c)
b = stage_call("reasoning", context=a)
c = stage_call("score", target=b)
"#;
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StageRegistry::new();
    for stage in ["query_processor", "reasoning_engine", "response_scorer"] {
        registry.register(stage, Arc::new(recording_stage(Arc::clone(&log))));
    }

    let protocol = compile_source(ring, "ring");
    assert_eq!(protocol.execution_mode, ExecutionMode::Sequential);
    let result = Orchestrator::new(registry).execute(&protocol).await;

    assert!(result.success);
    assert_eq!(*log.lock().unwrap(), vec!["ring_a", "ring_b", "ring_c"]);
}

#[tokio::test]
async fn test_adaptive_deadlock_fails_remaining_steps() {
    let source = r#"free = stage_call("query", query="x")
a = stage_call("reasoning", context=b)
b = stage_call("knowledge", query=a)
"#;
    let registry = StageRegistry::new()
        .with_stage("query_processor", ok_stage())
        .with_stage("reasoning_engine", ok_stage())
        .with_stage("knowledge_extractor", ok_stage());

    let protocol = compile_source(source, "p");
    assert_eq!(protocol.execution_mode, ExecutionMode::Adaptive);
    let result = Orchestrator::new(registry).execute(&protocol).await;

    assert_eq!(result.state, ProtocolState::Completed);
    assert!(!result.success);
    assert!(result.result("p_free").unwrap().success);
    for id in ["p_a", "p_b"] {
        assert_eq!(result.result(id).unwrap().error.as_deref(), Some(DEADLOCK_ERROR));
    }

    // One wave for `free`, then the round that detects the deadlock
    let rounds = result.scheduling_rounds.unwrap();
    assert_eq!(rounds, 2);
    assert!(rounds <= protocol.steps.len() + 1);
}

#[tokio::test]
async fn test_self_reference_deadlocks_under_adaptive_override() {
    let source = r#"s = stage_call("score", target=s)"#;
    let protocol = compile_source(source, "p");
    assert_eq!(protocol.execution_mode, ExecutionMode::Sequential);

    let registry = StageRegistry::new().with_stage("response_scorer", ok_stage());

    // Sequential ignores the graph
    let sequential = Orchestrator::new(registry.clone()).execute(&protocol).await;
    assert!(sequential.success);

    let adaptive = Orchestrator::new(registry)
        .with_config(OrchestratorConfig {
            mode_override: Some(ExecutionMode::Adaptive),
            ..OrchestratorConfig::default()
        })
        .execute(&protocol)
        .await;
    assert_eq!(adaptive.execution_mode, Some(ExecutionMode::Adaptive));
    assert_eq!(adaptive.step_results.len(), 1);
    assert_eq!(
        adaptive.step_results[0].error.as_deref(),
        Some(DEADLOCK_ERROR)
    );
    assert_eq!(adaptive.scheduling_rounds, Some(1));
    assert!(sequential.scheduling_rounds.is_none());
}

#[tokio::test]
async fn test_failed_dependency_still_unblocks_by_default() {
    let source = r#"a = stage_call("query", query="x")
b = stage_call("reasoning", context=a)
c = stage_call("score", target="z")
"#;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let registry = StageRegistry::new()
        .with_stage("query_processor", failing_stage("no results"))
        .with_stage("response_scorer", ok_stage())
        .with_stage(
            "reasoning_engine",
            FnStage::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StageError>(ValMap::new()) }
            }),
        );
    let protocol = compile_source(source, "p");

    let ungated = Orchestrator::new(registry.clone()).execute(&protocol).await;
    assert!(ungated.result("p_b").unwrap().success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let gated = Orchestrator::new(registry)
        .with_config(OrchestratorConfig {
            gate_on_success: true,
            ..OrchestratorConfig::default()
        })
        .execute(&protocol)
        .await;
    assert_eq!(
        gated.result("p_b").unwrap().error.as_deref(),
        Some("dependency 'p_a' failed")
    );
    assert!(gated.result("p_c").unwrap().success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/* ===================== Step Failures ===================== */

#[tokio::test]
async fn test_unknown_stage_fails_step() {
    let protocol = compile_source(r#"r = stage_call("reasoning", premise="p")"#, "p");
    let result = Orchestrator::new(StageRegistry::new()).execute(&protocol).await;

    assert!(!result.success);
    assert_eq!(
        result.step_results[0].error.as_deref(),
        Some("unknown stage 'reasoning_engine'")
    );
}

#[tokio::test]
async fn test_step_timeout() {
    let protocol = compile_source(r#"r = stage_call("reasoning", premise="p")"#, "p");
    let registry = StageRegistry::new().with_stage("reasoning_engine", sleeping_stage(30));

    let result = Orchestrator::new(registry)
        .with_step_timeout(Duration::from_millis(50))
        .execute(&protocol)
        .await;

    let error = result.step_results[0].error.clone().unwrap();
    assert!(error.starts_with("stage timed out"), "{}", error);
}

#[tokio::test]
async fn test_config_without_timeout_keeps_explicit_timeout() {
    let protocol = compile_source(r#"r = stage_call("reasoning", premise="p")"#, "p");
    let registry = StageRegistry::new().with_stage("reasoning_engine", sleeping_stage(30));

    let result = Orchestrator::new(registry)
        .with_step_timeout(Duration::from_millis(50))
        .with_config(OrchestratorConfig {
            gate_on_success: true,
            ..OrchestratorConfig::default()
        })
        .execute(&protocol)
        .await;

    let error = result.step_results[0].error.clone().unwrap();
    assert!(error.starts_with("stage timed out"), "{}", error);
}

#[tokio::test]
async fn test_cancelled_before_run() {
    let protocol = compile_source(DIAMOND, "dia");
    let registry = StageRegistry::new().with_stage("query_processor", ok_stage());
    let orchestrator = Orchestrator::new(registry);
    orchestrator.cancellation_token().cancel();

    let result = orchestrator.execute(&protocol).await;

    assert_eq!(result.step_results.len(), 4);
    assert!(result
        .step_results
        .iter()
        .all(|r| r.error.as_deref() == Some("execution cancelled")));
}

#[tokio::test]
async fn test_cancelled_while_running() {
    let protocol = compile_source(r#"r = stage_call("reasoning", premise="p")"#, "p");
    let registry = StageRegistry::new().with_stage("reasoning_engine", sleeping_stage(30));
    let orchestrator = Orchestrator::new(registry);

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let result = orchestrator.execute(&protocol).await;
    assert_eq!(
        result.step_results[0].error.as_deref(),
        Some("execution cancelled")
    );
}

#[tokio::test]
async fn test_panicking_stage_only_fails_its_step() {
    let source = "a = stage_call(\"query\", query=\"x\")\nb = stage_call(\"reasoning\", context=\"y\")\n";
    let registry = StageRegistry::new()
        .with_stage("query_processor", ok_stage())
        .with_stage("reasoning_engine", PanickingStage);

    let result = Orchestrator::new(registry)
        .execute(&compile_source(source, "p"))
        .await;

    assert!(result.result("p_a").unwrap().success);
    let error = result.result("p_b").unwrap().error.clone().unwrap();
    assert!(error.starts_with("stage task aborted"), "{}", error);
}

/* ===================== Run Bookkeeping ===================== */

#[tokio::test]
async fn test_compile_failure_in_strict_mode() {
    let source = r#"b = stage_call("reasoning", context=missing)"#;
    let stats = Arc::new(InMemoryStats::new());
    let orchestrator = Orchestrator::new(StageRegistry::new()).with_stats(stats.clone());

    let result = orchestrator
        .run_script(source, "p", &CompileOptions::strict())
        .await;

    assert_eq!(result.state, ProtocolState::CompileFailed);
    assert!(!result.success);
    assert!(result.step_results.is_empty());
    assert!(result.execution_mode.is_none());
    assert_eq!(result.annotated_script, source);
    assert!(result.error.unwrap().contains("unresolved name 'missing'"));
    assert_eq!(stats.snapshot().failed_executions, 1);
}

#[tokio::test]
async fn test_stats_recorded_once_per_run() {
    let stats = Arc::new(InMemoryStats::new());
    let registry = StageRegistry::new().with_stage("query_processor", ok_stage());
    let orchestrator = Orchestrator::new(registry).with_stats(stats.clone());

    let good = orchestrator
        .run_script(r#"a = stage_call("query", query="x")"#, "p", &CompileOptions::default())
        .await;
    let bad = orchestrator
        .run_script(r#"a = stage_call("score")"#, "p", &CompileOptions::default())
        .await;

    assert!(good.success);
    assert!(!bad.success);
    assert_ne!(good.run_id, bad.run_id);

    let snap: ExecutionStats = orchestrator.stats().snapshot();
    assert_eq!(snap.total_executions, 2);
    assert_eq!(snap.successful_executions, 1);
    assert_eq!(snap.failed_executions, 1);
    assert_eq!(stats.snapshot(), snap);
}

#[tokio::test]
async fn test_empty_protocol_succeeds() {
    let result = Orchestrator::new(StageRegistry::new())
        .run_script("# nothing here\n", "p", &CompileOptions::default())
        .await;

    assert!(result.success);
    assert!(result.step_results.is_empty());
    assert_eq!(result.annotated_script, "# nothing here\n");
}
