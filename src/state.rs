//! Agent State Store - Per-Task State Machine
//!
//! Information Hiding:
//! - Per-task locking discipline hidden behind `with_state`
//! - Handoff latch internals hidden behind begin/end methods
//! - Transition legality table internalized in `TaskStatus`
//!
//! One mutable state record exists per (agent, task) pair. The store
//! serializes writes per task: a planner worker owns its task's record for
//! the duration of a run, and handoff transfers that ownership explicitly.
//! Records of handed-off predecessors are retained for audit.

use crate::error::{EngineError, Result};
use crate::memory::TaskMemory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Task lifecycle states. `idle` is the pre-persistence initial state; the
/// planner and the handoff coordinator are the only writers of transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Planning,
    ExecutingTool,
    AwaitingModel,
    Completed,
    Aborted,
    Failed,
    HandedOff,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Aborted | Self::Failed | Self::HandedOff
        )
    }

    fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Idle, Planning) => true,
            (Planning, ExecutingTool) | (Planning, AwaitingModel) => true,
            (ExecutingTool, Planning) | (AwaitingModel, Planning) => true,
            // Any non-terminal state may finish, abort, fail, or hand off.
            (_, Completed) | (_, Aborted) | (_, Failed) | (_, HandedOff) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::ExecutingTool => "executing_tool",
            Self::AwaitingModel => "awaiting_model",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::HandedOff => "handed_off",
        };
        write!(f, "{}", name)
    }
}

/// A tool invocation recorded against a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tool: String,
    pub input: Value,
}

/// One executed planning step with its observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub iteration: u32,
    pub thought: String,
    pub action: Option<ActionRecord>,
    pub observation: Option<String>,
    pub tool_error: bool,
    pub at: DateTime<Utc>,
}

/// Mutable state record for one (agent, task) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub step_history: Vec<PlanStep>,
    pub started_at: DateTime<Utc>,
    pub last_progress_at: DateTime<Utc>,
    pub iteration_count: u32,
    pub memory: TaskMemory,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            status: TaskStatus::Idle,
            step_history: Vec::new(),
            started_at: now,
            last_progress_at: now,
            iteration_count: 0,
            memory: TaskMemory::new(),
        }
    }

    /// Apply a status transition, rejecting anything the state machine does
    /// not allow. An illegal transition is an internal fault, never silently
    /// dropped.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Internal(format!(
                "illegal status transition {} -> {} for task '{}'",
                self.status, next, self.task_id
            )));
        }
        tracing::debug!(
            "task '{}' agent '{}': {} -> {}",
            self.task_id,
            self.agent_id,
            self.status,
            next
        );
        self.status = next;
        Ok(())
    }

    pub fn record_step(&mut self, step: PlanStep) {
        self.last_progress_at = step.at;
        self.step_history.push(step);
    }
}

/// Read-only audit view of a task: the current owner's state plus the
/// retained states of every agent that previously handed the task off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub current: AgentState,
    pub predecessors: Vec<AgentState>,
}

struct TaskRecord {
    state: AgentState,
    predecessors: Vec<AgentState>,
    handoff_in_flight: bool,
    cancel: CancellationToken,
}

/// Store holding one record per active or retained task. Writes to a task
/// are serialized through its record mutex; the map lock is held only for
/// lookup and insertion.
pub struct AgentStateStore {
    tasks: RwLock<HashMap<String, Arc<Mutex<TaskRecord>>>>,
}

impl AgentStateStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Create the state record for a task's first invocation. Fails with
    /// `Conflict` if the task already has a non-terminal record.
    pub async fn create(&self, agent_id: &str, task_id: &str) -> Result<CancellationToken> {
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(task_id) {
            let record = existing.lock().await;
            if !record.state.status.is_terminal() {
                return Err(EngineError::Conflict(format!(
                    "task '{}' is already active under agent '{}'",
                    task_id, record.state.agent_id
                )));
            }
        }
        let cancel = CancellationToken::new();
        tasks.insert(
            task_id.to_string(),
            Arc::new(Mutex::new(TaskRecord {
                state: AgentState::new(agent_id, task_id),
                predecessors: Vec::new(),
                handoff_in_flight: false,
                cancel: cancel.clone(),
            })),
        );
        tracing::info!("created state for task '{}' under agent '{}'", task_id, agent_id);
        Ok(cancel)
    }

    async fn record(&self, task_id: &str) -> Result<Arc<Mutex<TaskRecord>>> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no state for task '{}'", task_id)))
    }

    /// Run a closure against the task's state under its write lock.
    pub async fn with_state<F, T>(&self, task_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut AgentState) -> Result<T>,
    {
        let record = self.record(task_id).await?;
        let mut guard = record.lock().await;
        f(&mut guard.state)
    }

    pub async fn snapshot(&self, task_id: &str) -> Result<TaskSnapshot> {
        let record = self.record(task_id).await?;
        let guard = record.lock().await;
        Ok(TaskSnapshot {
            current: guard.state.clone(),
            predecessors: guard.predecessors.clone(),
        })
    }

    pub async fn cancellation_token(&self, task_id: &str) -> Result<CancellationToken> {
        let record = self.record(task_id).await?;
        let guard = record.lock().await;
        Ok(guard.cancel.clone())
    }

    /// Request cancellation of the task's worker. The planner observes the
    /// token at its next suspension point and transitions to `aborted`.
    pub async fn request_abort(&self, task_id: &str) -> Result<()> {
        let record = self.record(task_id).await?;
        let guard = record.lock().await;
        tracing::info!("abort requested for task '{}'", task_id);
        guard.cancel.cancel();
        Ok(())
    }

    /// Whether any non-terminal task currently belongs to the agent. Used by
    /// the registry to refuse removal of agents with in-flight work.
    pub async fn has_active_task(&self, agent_id: &str) -> bool {
        let tasks = self.tasks.read().await;
        for record in tasks.values() {
            let guard = record.lock().await;
            if guard.state.agent_id == agent_id && !guard.state.status.is_terminal() {
                return true;
            }
        }
        false
    }

    /// Acquire the per-task handoff latch. Only one handoff may be in flight
    /// per task; a second concurrent attempt fails with `Conflict`.
    pub async fn begin_handoff(&self, task_id: &str) -> Result<()> {
        let record = self.record(task_id).await?;
        let mut guard = record.lock().await;
        if guard.handoff_in_flight {
            return Err(EngineError::Conflict(format!(
                "a handoff is already in progress for task '{}'",
                task_id
            )));
        }
        if guard.state.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "task '{}' is already terminal ({})",
                task_id, guard.state.status
            )));
        }
        guard.handoff_in_flight = true;
        Ok(())
    }

    pub async fn end_handoff(&self, task_id: &str) -> Result<()> {
        let record = self.record(task_id).await?;
        let mut guard = record.lock().await;
        guard.handoff_in_flight = false;
        Ok(())
    }

    /// Atomically retire the current owner's state as `handed_off` and seat
    /// a fresh state for the destination agent carrying the memory verbatim.
    /// Prior step history stays with the retired predecessor for audit.
    /// Caller must hold the handoff latch.
    pub async fn transfer(&self, task_id: &str, to_agent: &str) -> Result<TaskMemory> {
        let record = self.record(task_id).await?;
        let mut guard = record.lock().await;

        guard.state.transition(TaskStatus::HandedOff)?;
        let memory = guard.state.memory.clone();

        let mut successor = AgentState::new(to_agent, task_id);
        successor.memory = memory.clone();

        let retired = std::mem::replace(&mut guard.state, successor);
        guard.predecessors.push(retired);
        // Fresh token: cancellation of the source run must not leak into the
        // destination agent's run.
        guard.cancel = CancellationToken::new();
        Ok(memory)
    }

    /// Task ids currently present in the store (active and retained).
    pub async fn task_ids(&self) -> Vec<String> {
        let tasks = self.tasks.read().await;
        tasks.keys().cloned().collect()
    }
}

impl Default for AgentStateStore {
    fn default() -> Self {
        Self::new()
    }
}
