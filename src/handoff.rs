//! Handoff Coordinator - Cross-Agent Task Transfer
//!
//! Information Hiding:
//! - Latch/cancel/transfer ordering hidden behind `handoff`
//! - Record log storage hidden behind query methods
//!
//! Transfers an in-flight task from one agent to another: the source state
//! becomes `handed_off` (terminal for the source), a fresh state is seated
//! under the destination with the memory copied verbatim, and an immutable
//! `HandoffRecord` is appended. Only one handoff may be in flight per task.

use crate::error::{EngineError, Result};
use crate::memory::TaskMemory;
use crate::registry::AgentRegistry;
use crate::state::AgentStateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Immutable record of one completed handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub task_id: String,
    pub reason: String,
    /// Copy of the task memory at the moment of transfer.
    pub context_snapshot: TaskMemory,
    pub timestamp: DateTime<Utc>,
}

pub struct HandoffCoordinator {
    registry: Arc<AgentRegistry>,
    store: Arc<AgentStateStore>,
    log: RwLock<Vec<HandoffRecord>>,
}

impl HandoffCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<AgentStateStore>) -> Self {
        Self {
            registry,
            store,
            log: RwLock::new(Vec::new()),
        }
    }

    /// Transfer ownership of `task_id` from `from_agent` to `to_agent`.
    ///
    /// Preconditions: the source state exists, is owned by `from_agent`,
    /// and is not terminal; the destination agent is registered. A source
    /// worker still running is cancelled and observes the lost ownership at
    /// its next state write.
    pub async fn handoff(
        &self,
        from_agent: &str,
        to_agent: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<HandoffRecord> {
        if !self.registry.contains(to_agent).await {
            return Err(EngineError::NotFound(format!(
                "destination agent '{}'",
                to_agent
            )));
        }

        // Latch first: everything below runs under the per-task handoff
        // exclusivity guarantee.
        self.store.begin_handoff(task_id).await?;

        let result = self
            .transfer_locked(from_agent, to_agent, task_id, reason)
            .await;

        // Release the latch on both paths before surfacing the result.
        let _ = self.store.end_handoff(task_id).await;
        result
    }

    async fn transfer_locked(
        &self,
        from_agent: &str,
        to_agent: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<HandoffRecord> {
        let snapshot = self.store.snapshot(task_id).await?;
        if snapshot.current.agent_id != from_agent {
            return Err(EngineError::Conflict(format!(
                "task '{}' is owned by '{}', not '{}'",
                task_id, snapshot.current.agent_id, from_agent
            )));
        }

        // Stop the source worker before moving ownership; it winds down at
        // its next suspension point.
        let source_cancel = self.store.cancellation_token(task_id).await?;
        source_cancel.cancel();

        let memory = self.store.transfer(task_id, to_agent).await?;

        let record = HandoffRecord {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            context_snapshot: memory,
            timestamp: Utc::now(),
        };

        tracing::info!(
            "task '{}' handed off from '{}' to '{}' ({})",
            task_id,
            from_agent,
            to_agent,
            reason
        );

        let mut log = self.log.write().await;
        log.push(record.clone());
        Ok(record)
    }

    /// Append-only handoff history for a task, oldest first.
    pub async fn records_for(&self, task_id: &str) -> Vec<HandoffRecord> {
        let log = self.log.read().await;
        log.iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }
}
