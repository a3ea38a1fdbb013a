//! Engine - Composition Facade
//!
//! Wires the registry, state store, planner, tracker, handoff coordinator,
//! collaboration orchestrator, and archive into one explicitly constructed
//! object. Nothing here is a process-wide global; tests build as many
//! engines as they like with their own gateways.

use crate::archive::StateArchive;
use crate::collaboration::{
    CollaborationOptions, CollaborationOrchestrator, CollaborationSession, CoordinationStrategy,
};
use crate::config::Settings;
use crate::error::Result;
use crate::gateway::{ModelGateway, ToolGateway};
use crate::handoff::{HandoffCoordinator, HandoffRecord};
use crate::performance::{PerformanceMetric, PerformanceTracker};
use crate::planner::{Planner, PlannerResult};
use crate::registry::{AgentConfig, AgentConfigPatch, AgentRegistry};
use crate::state::{AgentStateStore, TaskSnapshot, TaskStatus};
use chrono::Duration;
use std::sync::Arc;

pub struct Engine {
    registry: Arc<AgentRegistry>,
    store: Arc<AgentStateStore>,
    tracker: Arc<PerformanceTracker>,
    planner: Arc<Planner>,
    handoff: HandoffCoordinator,
    collaboration: CollaborationOrchestrator,
    archive: Arc<dyn StateArchive>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        model: Arc<dyn ModelGateway>,
        tools: Arc<dyn ToolGateway>,
        archive: Arc<dyn StateArchive>,
    ) -> Self {
        let store = Arc::new(AgentStateStore::new());
        let registry = Arc::new(AgentRegistry::new(store.clone()));
        let tracker = Arc::new(PerformanceTracker::new());
        let planner = Arc::new(Planner::new(
            model,
            tools,
            tracker.clone(),
            store.clone(),
            settings.planner.clone(),
        ));
        let handoff = HandoffCoordinator::new(registry.clone(), store.clone());
        let collaboration = CollaborationOrchestrator::new(
            registry.clone(),
            store.clone(),
            planner.clone(),
            settings.system.clone(),
        );

        Self {
            registry,
            store,
            tracker,
            planner,
            handoff,
            collaboration,
            archive,
        }
    }

    // Agent registry surface.

    pub async fn register_agent(&self, config: AgentConfig) -> Result<String> {
        self.registry.register(config).await
    }

    pub async fn update_agent(&self, agent_id: &str, patch: AgentConfigPatch) -> Result<AgentConfig> {
        self.registry.update(agent_id, patch).await
    }

    pub async fn remove_agent(&self, agent_id: &str) -> Result<()> {
        self.registry.remove(agent_id).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentConfig> {
        self.registry.get(agent_id).await
    }

    pub async fn list_agents(&self) -> Vec<AgentConfig> {
        self.registry.list().await
    }

    // Task execution.

    /// Run a goal to a terminal status under one agent. The agent's config
    /// is snapshotted at start; registry updates never reach a running task.
    ///
    /// A handoff seats the destination agent's state as `idle` with the
    /// transferred memory; running that task under the destination agent
    /// resumes the existing record instead of conflicting on it.
    pub async fn run(&self, agent_id: &str, task_id: &str, goal: &str) -> Result<PlannerResult> {
        let config = self.registry.get(agent_id).await?;
        let cancel = match self.store.snapshot(task_id).await {
            Ok(snapshot)
                if snapshot.current.agent_id == agent_id
                    && snapshot.current.status == TaskStatus::Idle =>
            {
                self.store.cancellation_token(task_id).await?
            }
            _ => self.store.create(agent_id, task_id).await?,
        };

        let result = self.planner.run(&config, task_id, goal, cancel).await?;
        self.archive_terminal(task_id).await;
        Ok(result)
    }

    /// Request cancellation of a running task. The worker observes it at its
    /// next suspension point and finishes as `aborted`.
    pub async fn abort(&self, task_id: &str) -> Result<()> {
        self.store.request_abort(task_id).await
    }

    pub async fn get_state(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.store.snapshot(task_id).await
    }

    // Handoff.

    pub async fn handoff(
        &self,
        from_agent: &str,
        to_agent: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<HandoffRecord> {
        self.handoff.handoff(from_agent, to_agent, task_id, reason).await
    }

    pub async fn handoff_log(&self, task_id: &str) -> Vec<HandoffRecord> {
        self.handoff.records_for(task_id).await
    }

    // Collaboration.

    pub async fn collaborate(
        &self,
        agent_ids: &[String],
        task_id: &str,
        goal: &str,
        strategy: CoordinationStrategy,
        options: CollaborationOptions,
    ) -> Result<CollaborationSession> {
        let session = self
            .collaboration
            .start(agent_ids, task_id, goal, strategy, options)
            .await?;
        for participant in &session.participants {
            self.archive_terminal(&participant.task_id).await;
        }
        Ok(session)
    }

    // Performance.

    pub async fn get_performance(&self, agent_id: &str, window: Duration) -> PerformanceMetric {
        self.tracker.summarize(agent_id, window).await
    }

    /// Archive failures are logged, never surfaced; the run result stands on
    /// its own.
    async fn archive_terminal(&self, task_id: &str) {
        let snapshot = match self.store.snapshot(task_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!("cannot archive task '{}': {}", task_id, err);
                return;
            }
        };
        if let Err(err) = self.archive.archive(&snapshot).await {
            tracing::error!("failed to archive task '{}': {}", task_id, err);
        }
    }
}
