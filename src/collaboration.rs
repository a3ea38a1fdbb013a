//! Collaboration Orchestrator - Multi-Agent Sessions
//!
//! Information Hiding:
//! - Worker spawning and cancel plumbing hidden behind `start`
//! - Delegation interception hidden inside the hierarchical gateway wrapper
//!
//! Runs several agents against one goal under a coordination strategy.
//! Each participant owns a disjoint task id derived from the session task
//! id, so no relative ordering is needed across parallel workers. A session
//! timeout cancels all still-running participants; results from
//! already-terminal participants are retained. Aborting a hierarchical
//! session cascades into any delegation still in flight.

use crate::config::SystemSettings;
use crate::error::{EngineError, Result};
use crate::gateway::{ToolGateway, ToolOutcome};
use crate::planner::Planner;
use crate::registry::{AgentConfig, AgentRegistry};
use crate::state::{AgentStateStore, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pseudo-tool a hierarchical coordinator uses to delegate a sub-goal.
pub const DELEGATE_TOOL: &str = "delegate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    Parallel,
    Sequential,
    Hierarchical,
}

impl std::str::FromStr for CoordinationStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            "hierarchical" => Ok(Self::Hierarchical),
            other => Err(EngineError::Validation(format!(
                "unknown coordination strategy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted,
    Failed,
}

/// Terminal outcome of one participant (or one delegation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub agent_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub output: String,
    pub steps_taken: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub session_id: String,
    pub strategy: CoordinationStrategy,
    pub participant_agent_ids: Vec<String>,
    pub status: SessionStatus,
    pub participants: Vec<ParticipantResult>,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CollaborationOptions {
    /// Sequential only: skip a failed or aborted participant and continue
    /// the pipeline instead of halting.
    pub continue_on_failure: bool,
    /// Explicit session timeout override.
    pub session_timeout: Option<Duration>,
}

pub struct CollaborationOrchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<AgentStateStore>,
    planner: Arc<Planner>,
    settings: SystemSettings,
}

impl CollaborationOrchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<AgentStateStore>,
        planner: Arc<Planner>,
        settings: SystemSettings,
    ) -> Self {
        Self {
            registry,
            store,
            planner,
            settings,
        }
    }

    /// Run a collaboration to completion and return the terminal session.
    /// Per-participant progress is observable through the state store while
    /// the session runs.
    pub async fn start(
        &self,
        agent_ids: &[String],
        task_id: &str,
        goal: &str,
        strategy: CoordinationStrategy,
        options: CollaborationOptions,
    ) -> Result<CollaborationSession> {
        if agent_ids.is_empty() {
            return Err(EngineError::Validation(
                "collaboration requires at least one participant".to_string(),
            ));
        }

        // Copy-on-start config snapshots for every participant.
        let mut configs = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            configs.push(self.registry.get(agent_id).await?);
        }

        let timeout = self.session_timeout(&configs, &options);
        let session_token = CancellationToken::new();
        let timer = {
            let token = session_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("collaboration session timed out after {:?}", timeout);
                token.cancel();
            })
        };

        let started_at = Utc::now();
        tracing::info!(
            "starting {:?} collaboration '{}' with {} participants",
            strategy,
            task_id,
            configs.len()
        );

        let participants = match strategy {
            CoordinationStrategy::Parallel => {
                self.run_parallel(&configs, task_id, goal, &session_token).await
            }
            CoordinationStrategy::Sequential => {
                self.run_sequential(&configs, task_id, goal, &session_token, &options)
                    .await
            }
            CoordinationStrategy::Hierarchical => {
                self.run_hierarchical(&configs, task_id, goal, &session_token)
                    .await
            }
        };

        // The timer must not outlive the session, success or not.
        timer.abort();
        let participants = participants?;

        let status = aggregate_status(&participants);
        let output = merge_outputs(&participants);

        Ok(CollaborationSession {
            session_id: format!("collab-{}", task_id),
            strategy,
            participant_agent_ids: agent_ids.to_vec(),
            status,
            participants,
            output,
            started_at,
            finished_at: Some(Utc::now()),
        })
    }

    /// Session timeout: explicit override, else the maximum participant time
    /// bound, else the system default.
    fn session_timeout(&self, configs: &[AgentConfig], options: &CollaborationOptions) -> Duration {
        if let Some(timeout) = options.session_timeout {
            return timeout;
        }
        configs
            .iter()
            .filter_map(|c| c.abort.max_time_seconds)
            .max()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(self.settings.session_timeout_secs))
    }

    async fn run_parallel(
        &self,
        configs: &[AgentConfig],
        task_id: &str,
        goal: &str,
        session_token: &CancellationToken,
    ) -> Result<Vec<ParticipantResult>> {
        // Seat every participant before spawning anything, so a seating
        // failure leaves no detached workers behind. Participants seated
        // before the failure are retired rather than stranded as idle.
        let mut seats = Vec::with_capacity(configs.len());
        for config in configs {
            let participant_task = participant_task_id(task_id, &config.id);
            match self.store.create(&config.id, &participant_task).await {
                Ok(token) => seats.push((config.clone(), participant_task, token)),
                Err(err) => {
                    for (_, seated_task, _) in &seats {
                        let _ = self
                            .store
                            .with_state(seated_task, |state| {
                                state.transition(TaskStatus::Aborted)
                            })
                            .await;
                    }
                    return Err(err);
                }
            }
        }

        let mut handles: Vec<(AgentConfig, String, JoinHandle<Result<crate::planner::PlannerResult>>, JoinHandle<()>)> =
            Vec::new();

        for (config, participant_task, token) in seats {
            let forwarder =
                forward_cancel(session_token.clone(), self.store.clone(), participant_task.clone());

            let planner = self.planner.clone();
            let config_clone = config.clone();
            let goal = goal.to_string();
            let run_task = participant_task.clone();
            let handle = tokio::spawn(async move {
                planner.run(&config_clone, &run_task, &goal, token).await
            });
            handles.push((config, participant_task, handle, forwarder));
        }

        let joined = futures::future::join_all(handles.into_iter().map(
            |(config, participant_task, handle, forwarder)| async move {
                let result = handle.await;
                forwarder.abort();
                (config, participant_task, result)
            },
        ))
        .await;

        let mut participants = Vec::new();
        for (config, participant_task, joined) in joined {
            let result = joined
                .map_err(|e| EngineError::Internal(format!("worker panicked: {}", e)))??;
            participants.push(ParticipantResult {
                agent_id: config.id,
                task_id: participant_task,
                status: result.status,
                output: result.output,
                steps_taken: result.steps_taken,
            });
        }
        Ok(participants)
    }

    async fn run_sequential(
        &self,
        configs: &[AgentConfig],
        task_id: &str,
        goal: &str,
        session_token: &CancellationToken,
        options: &CollaborationOptions,
    ) -> Result<Vec<ParticipantResult>> {
        let mut participants = Vec::new();
        let mut piped_memory: Option<crate::memory::TaskMemory> = None;

        for config in configs {
            if session_token.is_cancelled() {
                break;
            }

            let participant_task = participant_task_id(task_id, &config.id);
            let token = self.store.create(&config.id, &participant_task).await?;
            if let Some(memory) = &piped_memory {
                let memory = memory.clone();
                self.store
                    .with_state(&participant_task, move |state| {
                        state.memory.merge_from(&memory);
                        Ok(())
                    })
                    .await?;
            }

            let forwarder =
                forward_cancel(session_token.clone(), self.store.clone(), participant_task.clone());
            let run_result = self
                .planner
                .run(config, &participant_task, goal, token)
                .await;
            // The forwarder dies with the participant, even when the run
            // itself errored.
            forwarder.abort();
            let result = run_result?;

            let terminal_status = result.status;
            let snapshot = self.store.snapshot(&participant_task).await?;
            participants.push(ParticipantResult {
                agent_id: config.id.clone(),
                task_id: participant_task,
                status: terminal_status,
                output: result.output,
                steps_taken: result.steps_taken,
            });

            if terminal_status != TaskStatus::Completed && !options.continue_on_failure {
                tracing::warn!(
                    "sequential pipeline halted at '{}' ({})",
                    config.id,
                    terminal_status
                );
                break;
            }
            // The participant's memory output feeds the next participant's
            // starting memory.
            piped_memory = Some(snapshot.current.memory);
        }
        Ok(participants)
    }

    async fn run_hierarchical(
        &self,
        configs: &[AgentConfig],
        task_id: &str,
        goal: &str,
        session_token: &CancellationToken,
    ) -> Result<Vec<ParticipantResult>> {
        // The first participant acts as coordinator; the rest are
        // subordinates reachable through the delegate pseudo-tool.
        let mut coordinator = configs[0].clone();
        coordinator.capabilities.push(DELEGATE_TOOL.to_string());
        let subordinates: HashMap<String, AgentConfig> = configs[1..]
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();

        let token = self.store.create(&coordinator.id, task_id).await?;
        let forwarder = forward_cancel(session_token.clone(), self.store.clone(), task_id.to_string());

        let delegation_results = Arc::new(Mutex::new(Vec::new()));
        let gateway = Arc::new(DelegationGateway {
            inner: self.planner.tool_gateway(),
            planner: self.planner.clone(),
            store: self.store.clone(),
            subordinates: subordinates.clone(),
            parent_task: task_id.to_string(),
            session_token: session_token.clone(),
            counter: AtomicU32::new(0),
            results: delegation_results.clone(),
        });
        let planner = Arc::new(self.planner.with_tool_gateway(gateway));

        let roster: String = subordinates
            .values()
            .map(|c| format!("- {}: {}\n", c.id, c.description))
            .collect();
        let coordinator_goal = format!(
            "{}\n\nYou coordinate a team. Delegate sub-goals with the '{}' tool, \
             input {{\"agent\": \"<name>\", \"goal\": \"<sub-goal>\"}}.\nTeam:\n{}",
            goal, DELEGATE_TOOL, roster
        );

        let run_result = planner
            .run(&coordinator, task_id, &coordinator_goal, token)
            .await;
        forwarder.abort();
        let result = run_result?;

        let mut participants = vec![ParticipantResult {
            agent_id: coordinator.id.clone(),
            task_id: task_id.to_string(),
            status: result.status,
            output: result.output,
            steps_taken: result.steps_taken,
        }];
        participants.extend(delegation_results.lock().await.iter().cloned());
        Ok(participants)
    }
}

/// Tool gateway wrapper that intercepts delegation requests from a
/// hierarchical coordinator. Delegation reuses the handoff memory-transfer
/// mechanism (coordinator memory seeds the subordinate, subordinate memory
/// merges back) but does not terminate the coordinator's state. The
/// blocking wait is bounded by the subordinate's own abort criteria and is
/// cancelled when the session aborts.
struct DelegationGateway {
    /// Base tool gateway for the coordinator's own capabilities.
    inner: Arc<dyn ToolGateway>,
    planner: Arc<Planner>,
    store: Arc<AgentStateStore>,
    subordinates: HashMap<String, AgentConfig>,
    parent_task: String,
    session_token: CancellationToken,
    counter: AtomicU32,
    results: Arc<Mutex<Vec<ParticipantResult>>>,
}

#[derive(Debug, Deserialize)]
struct DelegationRequest {
    agent: String,
    goal: String,
}

#[async_trait]
impl ToolGateway for DelegationGateway {
    async fn execute(&self, tool_name: &str, params: Value) -> Result<ToolOutcome> {
        if tool_name != DELEGATE_TOOL {
            // The coordinator keeps its own real capabilities.
            return self.inner.execute(tool_name, params).await;
        }

        let request: DelegationRequest = serde_json::from_value(params)
            .map_err(|e| EngineError::Validation(format!("bad delegation request: {}", e)))?;
        let Some(config) = self.subordinates.get(&request.agent) else {
            return Ok(ToolOutcome::failure(format!(
                "'{}' is not a subordinate of this session",
                request.agent
            )));
        };

        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let sub_task = format!("{}::delegate-{}-{}", self.parent_task, index, request.agent);
        self.store.create(&config.id, &sub_task).await?;

        // Seed the subordinate with the coordinator's memory.
        let parent_memory = self.store.snapshot(&self.parent_task).await?.current.memory;
        self.store
            .with_state(&sub_task, move |state| {
                state.memory.merge_from(&parent_memory);
                Ok(())
            })
            .await?;

        let token = self.store.cancellation_token(&sub_task).await?;
        let run = self.planner.run(config, &sub_task, &request.goal, token);
        tokio::pin!(run);
        let result = tokio::select! {
            result = &mut run => result?,
            _ = self.session_token.cancelled() => {
                // Cascade-abort: the session is going down, take the
                // delegation with it and wait for the worker to wind down.
                let _ = self.store.request_abort(&sub_task).await;
                (&mut run).await?
            }
        };

        // Merge what the subordinate learned back into the coordinator.
        let sub_memory = self.store.snapshot(&sub_task).await?.current.memory;
        self.store
            .with_state(&self.parent_task, move |state| {
                state.memory.merge_from(&sub_memory);
                Ok(())
            })
            .await?;

        let outcome = if result.status == TaskStatus::Completed {
            ToolOutcome::success(result.output.clone())
        } else {
            ToolOutcome::failure(format!(
                "delegation to '{}' ended {}: {}",
                request.agent, result.status, result.output
            ))
        };

        self.results.lock().await.push(ParticipantResult {
            agent_id: config.id.clone(),
            task_id: sub_task.clone(),
            status: result.status,
            output: result.output,
            steps_taken: result.steps_taken,
        });
        Ok(outcome)
    }
}

/// Disjoint per-participant task id under a session.
fn participant_task_id(task_id: &str, agent_id: &str) -> String {
    format!("{}::{}", task_id, agent_id)
}

/// Abort the task when the session token fires. Workers observe the abort
/// at their next suspension point.
fn forward_cancel(
    token: CancellationToken,
    store: Arc<AgentStateStore>,
    task_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        token.cancelled().await;
        let _ = store.request_abort(&task_id).await;
    })
}

/// Completed only once every participant is terminal and succeeded; a
/// failure dominates an abort.
fn aggregate_status(participants: &[ParticipantResult]) -> SessionStatus {
    if participants.is_empty() {
        return SessionStatus::Aborted;
    }
    if participants.iter().any(|p| p.status == TaskStatus::Failed) {
        SessionStatus::Failed
    } else if participants.iter().all(|p| p.status == TaskStatus::Completed) {
        SessionStatus::Completed
    } else {
        SessionStatus::Aborted
    }
}

/// Simple concatenation with per-participant attribution.
fn merge_outputs(participants: &[ParticipantResult]) -> String {
    participants
        .iter()
        .map(|p| format!("[{}] {}", p.agent_id, p.output))
        .collect::<Vec<_>>()
        .join("\n")
}
