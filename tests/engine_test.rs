//! End-to-end engine tests over scripted gateways. No network, no real
//! provider; the model gateway replays a prepared sequence of replies.

use async_trait::async_trait;
use maestro::archive::{InMemoryArchive, StateArchive};
use maestro::collaboration::{CollaborationOptions, CoordinationStrategy, SessionStatus};
use maestro::error::EngineError;
use maestro::gateway::{ModelGateway, ModelReply, ModelRequest, ToolGateway, ToolOutcome};
use maestro::{
    AbortCriteria, AgentConfig, Engine, ModelParams, PlanningStrategy, Settings, TaskStatus,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Replays prepared replies in order; when the script runs out it keeps
/// producing non-final thoughts. Records every request it saw.
struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(replies: Vec<ModelReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedModel {
    async fn invoke(&self, request: ModelRequest) -> maestro::Result<ModelReply> {
        self.requests.lock().await.push(request);
        let mut replies = self.replies.lock().await;
        Ok(replies
            .pop_front()
            .unwrap_or_else(|| ModelReply::thought("still thinking")))
    }
}

/// Hangs long enough for the test to abort or hand off the task mid-call.
struct SlowModel;

#[async_trait]
impl ModelGateway for SlowModel {
    async fn invoke(&self, _request: ModelRequest) -> maestro::Result<ModelReply> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ModelReply::thought("too late"))
    }
}

/// Like `ScriptedModel`, but a step in the script can hang instead of
/// replying, leaving the task suspended mid-call.
enum Staged {
    Reply(ModelReply),
    Hang,
}

struct StagedModel {
    steps: Mutex<VecDeque<Staged>>,
}

impl StagedModel {
    fn new(steps: Vec<Staged>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
        })
    }
}

#[async_trait]
impl ModelGateway for StagedModel {
    async fn invoke(&self, _request: ModelRequest) -> maestro::Result<ModelReply> {
        let step = self.steps.lock().await.pop_front();
        match step {
            Some(Staged::Reply(reply)) => Ok(reply),
            Some(Staged::Hang) | None => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ModelReply::thought("too late"))
            }
        }
    }
}

struct EchoTools;

#[async_trait]
impl ToolGateway for EchoTools {
    async fn execute(&self, tool_name: &str, params: Value) -> maestro::Result<ToolOutcome> {
        Ok(ToolOutcome::success(format!("{} -> {}", tool_name, params)))
    }
}

fn agent(id: &str, strategy: PlanningStrategy, capabilities: &[&str]) -> AgentConfig {
    AgentConfig {
        id: id.to_string(),
        name: id.to_string(),
        description: format!("{} test agent", id),
        capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        model: ModelParams::default(),
        planning_strategy: strategy,
        max_planning_steps: 10,
        abort: AbortCriteria {
            max_time_seconds: Some(60),
            max_steps: Some(10),
            stop_on_tool_error: false,
            no_progress_iterations: None,
            confidence_threshold: None,
        },
    }
}

fn engine_with(model: Arc<dyn ModelGateway>) -> (Engine, Arc<InMemoryArchive>) {
    let archive = Arc::new(InMemoryArchive::new());
    let engine = Engine::new(
        Settings::default(),
        model,
        Arc::new(EchoTools),
        archive.clone(),
    );
    (engine, archive)
}

#[tokio::test]
async fn test_registered_config_reads_back_identical() {
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    let submitted = agent("researcher", PlanningStrategy::React, &["calculator"]);

    engine.register_agent(submitted.clone()).await.unwrap();
    assert_eq!(engine.get_agent("researcher").await.unwrap(), submitted);
    // Reads are idempotent.
    assert_eq!(engine.get_agent("researcher").await.unwrap(), submitted);
}

#[tokio::test]
async fn test_react_stops_after_exact_step_limit() {
    // The script is empty, so the model produces endless non-final thoughts.
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    let mut config = agent("looper", PlanningStrategy::React, &[]);
    config.abort.max_steps = Some(3);
    engine.register_agent(config).await.unwrap();

    let result = engine.run("looper", "task-1", "never finishes").await.unwrap();

    assert_eq!(result.status, TaskStatus::Aborted);
    assert_eq!(result.steps_taken, 3);
    assert!(result.output.contains("step limit"));
}

#[tokio::test]
async fn test_tree_of_thought_stops_after_exact_step_limit() {
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    let mut config = agent("wanderer", PlanningStrategy::TreeOfThought, &[]);
    config.abort.max_steps = Some(3);
    engine.register_agent(config).await.unwrap();

    let result = engine.run("wanderer", "task-1", "never finishes").await.unwrap();

    assert_eq!(result.status, TaskStatus::Aborted);
    assert_eq!(result.steps_taken, 3);
}

#[tokio::test]
async fn test_react_aborts_on_no_progress() {
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    let mut config = agent("stuck", PlanningStrategy::React, &[]);
    config.abort.no_progress_iterations = Some(2);
    engine.register_agent(config).await.unwrap();

    let result = engine.run("stuck", "task-1", "spin in place").await.unwrap();

    assert_eq!(result.status, TaskStatus::Aborted);
    assert_eq!(result.steps_taken, 2);
    assert!(result.output.contains("no progress"));
}

#[tokio::test]
async fn test_react_completes_end_to_end() {
    let model = ScriptedModel::new(vec![
        ModelReply::tool_call("first lookup", "calculator", json!({"op": "add", "a": 1, "b": 2})),
        ModelReply::tool_call("second lookup", "calculator", json!({"op": "mul", "a": 3, "b": 14})),
        ModelReply::final_answer("the answer is 42"),
    ]);
    let (engine, archive) = engine_with(model.clone());
    engine
        .register_agent(agent("solver", PlanningStrategy::React, &["calculator"]))
        .await
        .unwrap();

    let result = engine.run("solver", "task-1", "compute the answer").await.unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.output, "the answer is 42");
    assert_eq!(result.steps_taken, 3);

    let snapshot = engine.get_state("task-1").await.unwrap();
    assert_eq!(snapshot.current.status, TaskStatus::Completed);
    assert_eq!(snapshot.current.step_history.len(), 3);
    assert!(snapshot.current.step_history[0].action.is_some());
    assert_eq!(
        snapshot.current.memory.get("final_answer"),
        Some(&json!("the answer is 42"))
    );

    let metric = engine
        .get_performance("solver", chrono::Duration::minutes(5))
        .await;
    assert_eq!(metric.invocation_count, 3);
    assert_eq!(metric.tool_call_count, 2);
    assert_eq!(metric.tool_failure_count, 0);
    assert_eq!(metric.success_count, 1);
    assert_eq!(metric.quality_score, 1.0);

    // Terminal snapshots land in the archive.
    let archived = archive.load("task-1").await.unwrap().unwrap();
    assert_eq!(archived.current.status, TaskStatus::Completed);

    assert_eq!(model.requests().await.len(), 3);
}

#[tokio::test]
async fn test_capability_violation_is_tool_failure_not_run_failure() {
    let model = ScriptedModel::new(vec![
        ModelReply::tool_call("try forbidden", "shell", json!({"cmd": "rm"})),
        ModelReply::final_answer("managed without it"),
    ]);
    let (engine, _) = engine_with(model);
    engine
        .register_agent(agent("restricted", PlanningStrategy::React, &["calculator"]))
        .await
        .unwrap();

    let result = engine.run("restricted", "task-1", "do the thing").await.unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    let snapshot = engine.get_state("task-1").await.unwrap();
    assert!(snapshot.current.step_history[0].tool_error);

    let metric = engine
        .get_performance("restricted", chrono::Duration::minutes(5))
        .await;
    assert_eq!(metric.tool_failure_count, 1);
}

#[tokio::test]
async fn test_abort_cancels_running_task() {
    let (engine, _) = engine_with(Arc::new(SlowModel));
    let engine = Arc::new(engine);
    engine
        .register_agent(agent("sleeper", PlanningStrategy::React, &[]))
        .await
        .unwrap();

    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run("sleeper", "task-1", "wait forever").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.abort("task-1").await.unwrap();

    let result = worker.await.unwrap().unwrap();
    assert_eq!(result.status, TaskStatus::Aborted);
    assert!(result.output.contains("cancelled"));

    let snapshot = engine.get_state("task-1").await.unwrap();
    assert_eq!(snapshot.current.status, TaskStatus::Aborted);
}

#[tokio::test]
async fn test_duplicate_task_id_conflicts_while_active() {
    let (engine, _) = engine_with(Arc::new(SlowModel));
    let engine = Arc::new(engine);
    engine
        .register_agent(agent("sleeper", PlanningStrategy::React, &[]))
        .await
        .unwrap();

    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run("sleeper", "task-1", "wait").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = engine.run("sleeper", "task-1", "again").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    engine.abort("task-1").await.unwrap();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handoff_while_running_seats_successor_cleanly() {
    let (engine, _) = engine_with(Arc::new(SlowModel));
    let engine = Arc::new(engine);
    engine
        .register_agent(agent("alpha", PlanningStrategy::React, &[]))
        .await
        .unwrap();
    engine
        .register_agent(agent("beta", PlanningStrategy::React, &[]))
        .await
        .unwrap();

    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run("alpha", "task-1", "long haul").await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let record = engine
        .handoff("alpha", "beta", "task-1", "needs beta")
        .await
        .unwrap();
    assert_eq!(record.to_agent, "beta");

    // The displaced worker winds down as aborted without touching the
    // successor's state.
    let result = worker.await.unwrap().unwrap();
    assert_eq!(result.status, TaskStatus::Aborted);

    let snapshot = engine.get_state("task-1").await.unwrap();
    assert_eq!(snapshot.current.agent_id, "beta");
    assert_eq!(snapshot.current.status, TaskStatus::Idle);
    assert!(snapshot.current.step_history.is_empty());
    assert_eq!(snapshot.predecessors.len(), 1);
    assert_eq!(snapshot.predecessors[0].status, TaskStatus::HandedOff);

    let log = engine.handoff_log("task-1").await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].reason, "needs beta");
}

#[tokio::test]
async fn test_destination_agent_resumes_handed_off_task() {
    // Alpha completes one tool step, then hangs mid-model-call; the task is
    // handed to beta, which picks it up with the transferred memory.
    let model = StagedModel::new(vec![
        Staged::Reply(ModelReply::tool_call(
            "gathering context",
            "search",
            json!({"q": "background"}),
        )),
        Staged::Hang,
        Staged::Reply(ModelReply::final_answer("picked up where alpha left off")),
    ]);
    let (engine, _) = engine_with(model);
    let engine = Arc::new(engine);
    engine
        .register_agent(agent("alpha", PlanningStrategy::React, &["search"]))
        .await
        .unwrap();
    engine
        .register_agent(agent("beta", PlanningStrategy::React, &[]))
        .await
        .unwrap();

    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run("alpha", "task-1", "dig in").await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine
        .handoff("alpha", "beta", "task-1", "escalate")
        .await
        .unwrap();
    let displaced = worker.await.unwrap().unwrap();
    assert_eq!(displaced.status, TaskStatus::Aborted);

    // Running the task under the destination agent resumes the seated
    // record instead of conflicting on it.
    let result = engine.run("beta", "task-1", "dig in").await.unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.output, "picked up where alpha left off");

    let snapshot = engine.get_state("task-1").await.unwrap();
    assert_eq!(snapshot.current.agent_id, "beta");
    assert_eq!(snapshot.current.status, TaskStatus::Completed);
    // Alpha's observation survived the transfer.
    assert!(snapshot.current.memory.get("observation_0").is_some());
    assert_eq!(snapshot.predecessors.len(), 1);
    assert_eq!(snapshot.predecessors[0].agent_id, "alpha");

    // With the task terminal, both agents can be removed.
    engine.remove_agent("alpha").await.unwrap();
    engine.remove_agent("beta").await.unwrap();
}

#[tokio::test]
async fn test_run_under_wrong_agent_still_conflicts_after_handoff() {
    let (engine, _) = engine_with(Arc::new(SlowModel));
    let engine = Arc::new(engine);
    engine
        .register_agent(agent("alpha", PlanningStrategy::React, &[]))
        .await
        .unwrap();
    engine
        .register_agent(agent("beta", PlanningStrategy::React, &[]))
        .await
        .unwrap();
    engine
        .register_agent(agent("gamma", PlanningStrategy::React, &[]))
        .await
        .unwrap();

    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run("alpha", "task-1", "long haul").await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine
        .handoff("alpha", "beta", "task-1", "needs beta")
        .await
        .unwrap();
    worker.await.unwrap().unwrap();

    // The seat belongs to beta; any other agent conflicts.
    let err = engine.run("gamma", "task-1", "steal it").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn test_parallel_collaboration_runs_every_participant() {
    let model = ScriptedModel::new(vec![
        ModelReply::final_answer("done"),
        ModelReply::final_answer("done"),
    ]);
    let (engine, archive) = engine_with(model);
    engine
        .register_agent(agent("a1", PlanningStrategy::None, &[]))
        .await
        .unwrap();
    engine
        .register_agent(agent("a2", PlanningStrategy::None, &[]))
        .await
        .unwrap();

    let session = engine
        .collaborate(
            &["a1".to_string(), "a2".to_string()],
            "collab-1",
            "shared goal",
            CoordinationStrategy::Parallel,
            CollaborationOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.participants.len(), 2);
    assert!(session.output.contains("[a1]"));
    assert!(session.output.contains("[a2]"));

    for participant in &session.participants {
        assert_eq!(participant.status, TaskStatus::Completed);
        let snapshot = engine.get_state(&participant.task_id).await.unwrap();
        assert_eq!(snapshot.current.status, TaskStatus::Completed);
        assert!(archive.load(&participant.task_id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_sequential_collaboration_pipes_memory_forward() {
    let model = ScriptedModel::new(vec![
        ModelReply::final_answer("alpha-result"),
        ModelReply::final_answer("beta-result"),
    ]);
    let (engine, _) = engine_with(model.clone());
    engine
        .register_agent(agent("a1", PlanningStrategy::None, &[]))
        .await
        .unwrap();
    engine
        .register_agent(agent("a2", PlanningStrategy::None, &[]))
        .await
        .unwrap();

    let session = engine
        .collaborate(
            &["a1".to_string(), "a2".to_string()],
            "pipeline-1",
            "two stage goal",
            CoordinationStrategy::Sequential,
            CollaborationOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.participants[0].agent_id, "a1");
    assert_eq!(session.participants[1].agent_id, "a2");

    // The second participant's prompt carries the first one's findings.
    let requests = model.requests().await;
    assert_eq!(requests.len(), 2);
    let second_prompt = &requests[1].messages.last().unwrap().content;
    assert!(second_prompt.contains("alpha-result"));
}

#[tokio::test]
async fn test_sequential_halts_on_failed_participant() {
    // First participant never finishes and hits its step cap; the pipeline
    // stops there by default.
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    let mut first = agent("a1", PlanningStrategy::React, &[]);
    first.abort.max_steps = Some(1);
    engine.register_agent(first).await.unwrap();
    engine
        .register_agent(agent("a2", PlanningStrategy::None, &[]))
        .await
        .unwrap();

    let session = engine
        .collaborate(
            &["a1".to_string(), "a2".to_string()],
            "pipeline-2",
            "goal",
            CoordinationStrategy::Sequential,
            CollaborationOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(session.participants.len(), 1);
}

#[tokio::test]
async fn test_hierarchical_delegation_round_trip() {
    let model = ScriptedModel::new(vec![
        ModelReply::tool_call(
            "delegating the research",
            "delegate",
            json!({"agent": "helper", "goal": "dig up the details"}),
        ),
        ModelReply::final_answer("sub-done"),
        ModelReply::final_answer("all wrapped up"),
    ]);
    let (engine, _) = engine_with(model);
    engine
        .register_agent(agent("boss", PlanningStrategy::React, &[]))
        .await
        .unwrap();
    engine
        .register_agent(agent("helper", PlanningStrategy::None, &[]))
        .await
        .unwrap();

    let session = engine
        .collaborate(
            &["boss".to_string(), "helper".to_string()],
            "hier-1",
            "coordinate the work",
            CoordinationStrategy::Hierarchical,
            CollaborationOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.participants.len(), 2);
    assert_eq!(session.participants[0].agent_id, "boss");
    assert_eq!(session.participants[0].output, "all wrapped up");
    assert_eq!(session.participants[1].agent_id, "helper");
    assert!(session.participants[1].task_id.contains("delegate-0-helper"));

    // The coordinator saw the delegation result as a tool observation.
    let snapshot = engine.get_state("hier-1").await.unwrap();
    let delegated_step = &snapshot.current.step_history[0];
    assert_eq!(delegated_step.observation.as_deref(), Some("sub-done"));
}

#[tokio::test]
async fn test_collaboration_session_timeout_aborts_participants() {
    let (engine, _) = engine_with(Arc::new(SlowModel));
    engine
        .register_agent(agent("sleeper", PlanningStrategy::React, &[]))
        .await
        .unwrap();

    let options = CollaborationOptions {
        continue_on_failure: false,
        session_timeout: Some(Duration::from_millis(200)),
    };
    let session = engine
        .collaborate(
            &["sleeper".to_string()],
            "slow-collab",
            "never finishes",
            CoordinationStrategy::Parallel,
            options,
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(session.participants[0].status, TaskStatus::Aborted);
}

#[tokio::test]
async fn test_parallel_collaboration_retires_seats_on_conflict() {
    // The same agent listed twice collides on its participant task id. The
    // session fails fast and the seat taken before the collision is retired
    // instead of stranded as an active task.
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    engine
        .register_agent(agent("a1", PlanningStrategy::None, &[]))
        .await
        .unwrap();

    let err = engine
        .collaborate(
            &["a1".to_string(), "a1".to_string()],
            "collab-dup",
            "goal",
            CoordinationStrategy::Parallel,
            CollaborationOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let snapshot = engine.get_state("collab-dup::a1").await.unwrap();
    assert_eq!(snapshot.current.status, TaskStatus::Aborted);
    // No in-flight work is left pinning the agent.
    engine.remove_agent("a1").await.unwrap();
}

#[tokio::test]
async fn test_collaboration_rejects_unknown_participant() {
    let (engine, _) = engine_with(ScriptedModel::new(vec![]));
    let err = engine
        .collaborate(
            &["ghost".to_string()],
            "collab-x",
            "goal",
            CoordinationStrategy::Parallel,
            CollaborationOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}
