//! Planner - Bounded, Strategy-Selectable Planning Loop
//!
//! Information Hiding:
//! - Abort evaluation and step recording shared via `PlanContext`, not
//!   duplicated per strategy
//! - Provider retry policy internalized in `consult_model`
//! - Status transitions internalized; strategies never touch `TaskStatus`
//!
//! The planner turns a goal into a sequence of actions by dispatching to one
//! of four strategies. All strategies share the same abort evaluation
//! (checked before every iteration), the same step recording, and the same
//! cancellation-aware gateway calls. Every suspension point observes the
//! task's cancellation token; the planner never suspends while holding a
//! state write.

mod direct;
mod plan_execute;
mod react;
mod tree_of_thought;

use crate::config::PlannerSettings;
use crate::error::{EngineError, Result};
use crate::gateway::{ChatMessage, ModelGateway, ModelReply, ModelRequest, ToolGateway, ToolOutcome};
use crate::performance::{PerfEvent, PerformanceTracker};
use crate::registry::{AgentConfig, PlanningStrategy};
use crate::state::{ActionRecord, AgentStateStore, PlanStep, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a planning loop stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    TimeLimit,
    StepLimit,
    NoProgress,
    ToolError,
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::TimeLimit => "time limit exceeded",
            Self::StepLimit => "step limit exceeded",
            Self::NoProgress => "no progress across recent iterations",
            Self::ToolError => "tool failure with stop_on_tool_error set",
            Self::Cancelled => "cancelled by caller",
        };
        write!(f, "{}", text)
    }
}

/// Terminal outcome of a planning run.
#[derive(Debug, Clone)]
pub struct PlannerResult {
    /// One of `Completed`, `Aborted`, `Failed`.
    pub status: TaskStatus,
    pub output: String,
    pub steps_taken: u32,
}

pub(crate) enum StrategyOutcome {
    Completed { output: String },
    Aborted { reason: AbortReason },
}

/// Outcome of one model-gateway consultation.
pub(crate) enum ModelCall {
    Reply(ModelReply),
    /// The task's cancellation token fired mid-call.
    Cancelled,
    /// Retries exhausted on transient provider errors. Counts as a failed
    /// step toward the no-progress window; the run continues.
    Exhausted(String),
}

#[async_trait]
pub(crate) trait PlanStrategy: Send + Sync {
    async fn execute(&self, cx: &mut PlanContext<'_>) -> Result<StrategyOutcome>;
}

struct IterationMark {
    memory_revision: u64,
    observed: bool,
}

/// Shared per-run machinery handed to every strategy: gateway calls with
/// retry and cancellation, abort evaluation, step recording, memory access.
pub(crate) struct PlanContext<'a> {
    model: &'a dyn ModelGateway,
    tools: &'a dyn ToolGateway,
    tracker: &'a PerformanceTracker,
    store: &'a AgentStateStore,
    settings: &'a PlannerSettings,
    pub(crate) config: &'a AgentConfig,
    pub(crate) task_id: &'a str,
    pub(crate) goal: &'a str,
    cancel: CancellationToken,
    started: Instant,
    progress_window: VecDeque<IterationMark>,
    /// Memory revision when the run started, the stall baseline until the
    /// window has a preceding mark.
    initial_revision: u64,
    last_tool_failed: bool,
    steps_taken: u32,
}

impl<'a> PlanContext<'a> {
    pub(crate) fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    /// Effective iteration cap: the tighter of the config's planning-step
    /// ceiling and the abort criteria's step bound.
    pub(crate) fn step_cap(&self) -> u32 {
        let abort_cap = self.config.abort.max_steps.unwrap_or(u32::MAX);
        self.config.max_planning_steps.min(abort_cap)
    }

    /// Evaluate abort criteria. Called by every strategy before every
    /// iteration.
    pub(crate) fn check_abort(&self) -> Option<AbortReason> {
        if self.cancel.is_cancelled() {
            return Some(AbortReason::Cancelled);
        }
        if let Some(max_secs) = self.config.abort.max_time_seconds {
            if self.started.elapsed() >= Duration::from_secs(max_secs) {
                return Some(AbortReason::TimeLimit);
            }
        }
        if self.steps_taken >= self.step_cap() {
            return Some(AbortReason::StepLimit);
        }
        if self.config.abort.stop_on_tool_error && self.last_tool_failed {
            return Some(AbortReason::ToolError);
        }
        if let Some(window) = self.config.abort.no_progress_iterations {
            let window = window as usize;
            if self.progress_window.len() >= window {
                let mut marks = self.progress_window.iter().rev();
                let recent: Vec<&IterationMark> = marks.by_ref().take(window).collect();
                // Judge the window against the revision that preceded it, so
                // a memory write during the window's first iteration still
                // counts as progress.
                let baseline = marks
                    .next()
                    .map(|m| m.memory_revision)
                    .unwrap_or(self.initial_revision);
                let stalled = recent.iter().all(|m| !m.observed)
                    && recent.iter().all(|m| m.memory_revision == baseline);
                if stalled {
                    return Some(AbortReason::NoProgress);
                }
            }
        }
        None
    }

    /// Model-provided confidence at or above the configured threshold counts
    /// as completion. Absent confidence never triggers it.
    pub(crate) fn confidence_met(&self, reply: &ModelReply) -> bool {
        match (self.config.abort.confidence_threshold, reply.confidence) {
            (Some(threshold), Some(confidence)) => confidence >= threshold,
            _ => false,
        }
    }

    /// Ask the model gateway for the next step. Suspends in `awaiting_model`
    /// status; transient provider failures are retried with exponential
    /// backoff up to the configured count.
    pub(crate) async fn consult_model(&mut self, messages: Vec<ChatMessage>) -> Result<ModelCall> {
        if !self.enter(TaskStatus::AwaitingModel).await? {
            return Ok(ModelCall::Cancelled);
        }

        let request = ModelRequest {
            messages,
            params: self.config.model.clone(),
        };

        let mut last_error = String::new();
        let attempts = self.settings.provider_retries.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.settings.provider_backoff_base_ms * 2u64.pow(attempt - 1);
                tracing::warn!(
                    "retrying model call for task '{}' (attempt {}/{}) after {}ms",
                    self.task_id,
                    attempt + 1,
                    attempts,
                    backoff
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return self.leave_cancelled().await,
                    _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                }
            }

            let call_started = Instant::now();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return self.leave_cancelled().await,
                outcome = self.model.invoke(request.clone()) => outcome,
            };
            self.tracker
                .record(
                    &self.config.id,
                    PerfEvent::InvocationLatency {
                        millis: call_started.elapsed().as_millis() as u64,
                    },
                )
                .await;

            match outcome {
                Ok(reply) => {
                    if let Some(tokens) = reply.tokens_used {
                        self.tracker
                            .record(&self.config.id, PerfEvent::TokensUsed { tokens })
                            .await;
                    }
                    self.enter(TaskStatus::Planning).await?;
                    return Ok(ModelCall::Reply(reply));
                }
                Err(err) if err.is_retryable() => {
                    last_error = err.to_string();
                }
                Err(err) => {
                    // Quota and other fatal provider errors are not
                    // retryable within the current task.
                    self.enter(TaskStatus::Planning).await?;
                    return Err(err);
                }
            }
        }

        self.enter(TaskStatus::Planning).await?;
        Ok(ModelCall::Exhausted(last_error))
    }

    /// Invoke a tool through the capability gateway. Unknown tools and
    /// capability-set violations are tool failures, not run failures.
    /// Returns `None` when cancelled mid-call.
    pub(crate) async fn invoke_tool(
        &mut self,
        tool: &str,
        input: Value,
    ) -> Result<Option<ToolOutcome>> {
        if !self.config.allows_tool(tool) {
            tracing::warn!(
                "agent '{}' requested tool '{}' outside its capability set",
                self.config.id,
                tool
            );
            let outcome =
                ToolOutcome::failure(format!("tool '{}' is not in the agent's capability set", tool));
            self.note_tool_outcome(&outcome).await;
            return Ok(Some(outcome));
        }

        if !self.enter(TaskStatus::ExecutingTool).await? {
            return Ok(None);
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.enter(TaskStatus::Planning).await?;
                return Ok(None);
            }
            result = self.tools.execute(tool, input) => result,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(EngineError::CapabilityNotFound(message)) => ToolOutcome::failure(message),
            Err(EngineError::Internal(message)) => return Err(EngineError::Internal(message)),
            Err(err) => ToolOutcome::failure(err.to_string()),
        };

        self.note_tool_outcome(&outcome).await;
        self.enter(TaskStatus::Planning).await?;
        Ok(Some(outcome))
    }

    async fn note_tool_outcome(&mut self, outcome: &ToolOutcome) {
        self.last_tool_failed = !outcome.success;
        self.tracker
            .record(
                &self.config.id,
                PerfEvent::ToolCall {
                    success: outcome.success,
                },
            )
            .await;
    }

    /// Append a step to the task's history and advance the iteration count
    /// and no-progress window.
    pub(crate) async fn record_step(
        &mut self,
        thought: impl Into<String>,
        action: Option<ActionRecord>,
        observation: Option<String>,
        tool_error: bool,
    ) -> Result<()> {
        let thought = thought.into();
        let observed = action.is_some() && observation.is_some() && !tool_error;
        let owner = self.config.id.clone();
        let revision = self
            .store
            .with_state(self.task_id, move |state| {
                if state.agent_id != owner {
                    // Ownership lost mid-step; never write into the
                    // successor's history.
                    return Ok(state.memory.revision());
                }
                state.record_step(PlanStep {
                    iteration: state.iteration_count,
                    thought,
                    action,
                    observation,
                    tool_error,
                    at: Utc::now(),
                });
                state.iteration_count += 1;
                Ok(state.memory.revision())
            })
            .await?;

        self.progress_window.push_back(IterationMark {
            memory_revision: revision,
            observed,
        });
        // Retain one mark beyond the window so the stall baseline survives.
        let retain = self
            .config
            .abort
            .no_progress_iterations
            .map(|w| w as usize + 1)
            .unwrap_or(32);
        while self.progress_window.len() > retain {
            self.progress_window.pop_front();
        }
        self.steps_taken += 1;
        Ok(())
    }

    /// Write a memory entry for the task.
    pub(crate) async fn remember(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        let owner = self.config.id.clone();
        self.store
            .with_state(self.task_id, move |state| {
                if state.agent_id == owner {
                    state.memory.insert(key, value);
                }
                Ok(())
            })
            .await
    }

    /// Render the task's current memory as a prompt context block.
    pub(crate) async fn memory_context(&self) -> Result<String> {
        self.store
            .with_state(self.task_id, |state| Ok(state.memory.to_prompt_context()))
            .await
    }

    /// Transition the task status, tolerating lost ownership: when the state
    /// is already terminal, or the task was handed off and the record now
    /// belongs to the successor agent, the run winds down instead of
    /// touching state it no longer owns.
    async fn enter(&self, status: TaskStatus) -> Result<bool> {
        let owner = self.config.id.clone();
        let result = self
            .store
            .with_state(self.task_id, move |state| {
                if state.status.is_terminal() || state.agent_id != owner {
                    return Ok(false);
                }
                state.transition(status)?;
                Ok(true)
            })
            .await?;
        Ok(result)
    }

    async fn leave_cancelled(&self) -> Result<ModelCall> {
        self.enter(TaskStatus::Planning).await?;
        Ok(ModelCall::Cancelled)
    }
}

/// Planning engine over injected gateways, state store, and tracker.
pub struct Planner {
    model: Arc<dyn ModelGateway>,
    tools: Arc<dyn ToolGateway>,
    tracker: Arc<PerformanceTracker>,
    store: Arc<AgentStateStore>,
    settings: PlannerSettings,
}

impl Planner {
    pub fn new(
        model: Arc<dyn ModelGateway>,
        tools: Arc<dyn ToolGateway>,
        tracker: Arc<PerformanceTracker>,
        store: Arc<AgentStateStore>,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            model,
            tools,
            tracker,
            store,
            settings,
        }
    }

    /// Clone of this planner with a different tool gateway. Hierarchical
    /// collaboration uses this to intercept delegation requests.
    pub fn with_tool_gateway(&self, tools: Arc<dyn ToolGateway>) -> Self {
        Self {
            model: self.model.clone(),
            tools,
            tracker: self.tracker.clone(),
            store: self.store.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn store(&self) -> &Arc<AgentStateStore> {
        &self.store
    }

    pub fn tool_gateway(&self) -> Arc<dyn ToolGateway> {
        self.tools.clone()
    }

    /// Run the planning loop for an existing task state. The config is the
    /// caller's copy-on-start snapshot; concurrent registry updates never
    /// reach a running loop.
    pub async fn run(
        &self,
        config: &AgentConfig,
        task_id: &str,
        goal: &str,
        cancel: CancellationToken,
    ) -> Result<PlannerResult> {
        tracing::info!(
            "planner starting task '{}' for agent '{}' ({:?})",
            task_id,
            config.id,
            config.planning_strategy
        );

        let initial_revision = self
            .store
            .with_state(task_id, |state| {
                state.transition(TaskStatus::Planning)?;
                Ok(state.memory.revision())
            })
            .await?;

        let mut cx = PlanContext {
            model: self.model.as_ref(),
            tools: self.tools.as_ref(),
            tracker: self.tracker.as_ref(),
            store: self.store.as_ref(),
            settings: &self.settings,
            config,
            task_id,
            goal,
            cancel,
            started: Instant::now(),
            progress_window: VecDeque::new(),
            initial_revision,
            last_tool_failed: false,
            steps_taken: 0,
        };

        let strategy: Box<dyn PlanStrategy> = match config.planning_strategy {
            PlanningStrategy::None => Box::new(direct::DirectStrategy),
            PlanningStrategy::React => Box::new(react::ReactStrategy),
            PlanningStrategy::PlanExecute => Box::new(plan_execute::PlanExecuteStrategy),
            PlanningStrategy::TreeOfThought => Box::new(tree_of_thought::TreeOfThoughtStrategy {
                branching_factor: self.settings.tree_branching_factor.max(2),
            }),
        };

        let outcome = strategy.execute(&mut cx).await;
        let steps_taken = cx.steps_taken();

        let result = match outcome {
            Ok(StrategyOutcome::Completed { output }) => {
                self.finish(task_id, &config.id, TaskStatus::Completed).await;
                self.tracker.record(&config.id, PerfEvent::Success).await;
                PlannerResult {
                    status: TaskStatus::Completed,
                    output,
                    steps_taken,
                }
            }
            Ok(StrategyOutcome::Aborted { reason }) => {
                self.finish(task_id, &config.id, TaskStatus::Aborted).await;
                self.tracker.record(&config.id, PerfEvent::Failure).await;
                tracing::warn!("task '{}' aborted: {}", task_id, reason);
                PlannerResult {
                    status: TaskStatus::Aborted,
                    output: format!("aborted: {}", reason),
                    steps_taken,
                }
            }
            Err(err) => {
                self.finish(task_id, &config.id, TaskStatus::Failed).await;
                self.tracker.record(&config.id, PerfEvent::Failure).await;
                tracing::error!("task '{}' failed: {}", task_id, err);
                PlannerResult {
                    status: TaskStatus::Failed,
                    output: format!("failed: {}", err),
                    steps_taken,
                }
            }
        };

        Ok(result)
    }

    /// Write the terminal status unless ownership was lost to a handoff; a
    /// terminal transition is never silently dropped, only superseded by an
    /// already-terminal state or a successor agent's fresh state.
    async fn finish(&self, task_id: &str, agent_id: &str, status: TaskStatus) {
        let owner = agent_id.to_string();
        let result = self
            .store
            .with_state(task_id, move |state| {
                if state.status.is_terminal() || state.agent_id != owner {
                    tracing::debug!(
                        "task '{}' no longer owned as started ({} under '{}'), skipping {} write",
                        state.task_id,
                        state.status,
                        state.agent_id,
                        status
                    );
                    return Ok(());
                }
                state.transition(status)
            })
            .await;
        if let Err(err) = result {
            tracing::error!("failed to finalize task '{}': {}", task_id, err);
        }
    }
}

/// Parse a JSON document of type `T` out of model text, tolerating prose
/// around the outermost braces.
pub(crate) fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<T>(text) {
        return Some(value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&text[start..=end]).ok()
}

/// Capability list block shared by strategy prompts.
pub(crate) fn capability_block(config: &AgentConfig) -> String {
    if config.capabilities.is_empty() {
        "You have no tools available. Reason directly.".to_string()
    } else {
        format!("Available tools: {}", config.capabilities.join(", "))
    }
}

/// The JSON decision protocol every strategy asks the model to follow.
pub(crate) fn decision_protocol() -> &'static str {
    "Respond in this EXACT JSON format:\n\
     {\n  \
       \"thought\": \"your reasoning about what to do next\",\n  \
       \"action\": {\"tool\": \"tool_name\", \"input\": {\"param\": \"value\"}},\n  \
       \"is_final\": false,\n  \
       \"final_answer\": null,\n  \
       \"confidence\": 0.0\n\
     }\n\
     When the task is COMPLETE set is_final to true, action to null, and\n\
     provide a clear final_answer. Respond with valid JSON only."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AbortCriteria, ModelParams};
    use serde_json::json;

    struct SilentModel;

    #[async_trait]
    impl ModelGateway for SilentModel {
        async fn invoke(&self, _request: ModelRequest) -> Result<ModelReply> {
            Ok(ModelReply::thought("thinking"))
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolGateway for NoTools {
        async fn execute(&self, _tool: &str, _params: Value) -> Result<ToolOutcome> {
            Ok(ToolOutcome::success("ok"))
        }
    }

    fn config(no_progress: u32) -> AgentConfig {
        AgentConfig {
            id: "stall-check".to_string(),
            name: "stall-check".to_string(),
            description: "test agent".to_string(),
            capabilities: Vec::new(),
            model: ModelParams::default(),
            planning_strategy: PlanningStrategy::React,
            max_planning_steps: 20,
            abort: AbortCriteria {
                max_time_seconds: Some(300),
                max_steps: Some(20),
                stop_on_tool_error: false,
                no_progress_iterations: Some(no_progress),
                confidence_threshold: None,
            },
        }
    }

    #[tokio::test]
    async fn test_no_progress_counts_writes_in_first_window_slot() {
        let store = AgentStateStore::new();
        store.create("stall-check", "task-1").await.unwrap();
        store
            .with_state("task-1", |s| s.transition(TaskStatus::Planning))
            .await
            .unwrap();

        let model = SilentModel;
        let tools = NoTools;
        let tracker = PerformanceTracker::new();
        let settings = crate::config::Settings::default().planner;
        let config = config(2);
        let mut cx = PlanContext {
            model: &model,
            tools: &tools,
            tracker: &tracker,
            store: &store,
            settings: &settings,
            config: &config,
            task_id: "task-1",
            goal: "goal",
            cancel: CancellationToken::new(),
            started: Instant::now(),
            progress_window: VecDeque::new(),
            initial_revision: 0,
            last_tool_failed: false,
            steps_taken: 0,
        };

        // A memory write during the window's first iteration is progress,
        // even though both marks in the window carry the same revision.
        cx.remember("finding", json!("x")).await.unwrap();
        cx.record_step("thought 1", None, None, false).await.unwrap();
        cx.record_step("thought 2", None, None, false).await.unwrap();
        assert_eq!(cx.check_abort(), None);

        // One more writeless iteration and the window really has stalled.
        cx.record_step("thought 3", None, None, false).await.unwrap();
        assert_eq!(cx.check_abort(), Some(AbortReason::NoProgress));
    }

    #[tokio::test]
    async fn test_no_progress_fires_without_any_writes() {
        let store = AgentStateStore::new();
        store.create("stall-check", "task-1").await.unwrap();
        store
            .with_state("task-1", |s| s.transition(TaskStatus::Planning))
            .await
            .unwrap();

        let model = SilentModel;
        let tools = NoTools;
        let tracker = PerformanceTracker::new();
        let settings = crate::config::Settings::default().planner;
        let config = config(2);
        let mut cx = PlanContext {
            model: &model,
            tools: &tools,
            tracker: &tracker,
            store: &store,
            settings: &settings,
            config: &config,
            task_id: "task-1",
            goal: "goal",
            cancel: CancellationToken::new(),
            started: Instant::now(),
            progress_window: VecDeque::new(),
            initial_revision: 0,
            last_tool_failed: false,
            steps_taken: 0,
        };

        cx.record_step("thought 1", None, None, false).await.unwrap();
        cx.record_step("thought 2", None, None, false).await.unwrap();
        assert_eq!(cx.check_abort(), Some(AbortReason::NoProgress));
    }
}
