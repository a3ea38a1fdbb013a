//! Agent Registry
//!
//! Information Hiding:
//! - Config storage and lookup implementation hidden
//! - Validation rules internalized
//!
//! Holds agent configuration entities. Configs are snapshotted by the
//! planner at task start (copy-on-start), so `update` never changes the
//! behavior of a task already in flight. `remove` refuses agents that still
//! own non-terminal state.

use crate::error::{EngineError, Result};
use crate::state::AgentStateStore;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

static AGENT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]{0,63}$").expect("valid pattern"));

/// How the planner turns a goal into a sequence of actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningStrategy {
    /// Single gateway pass, no loop.
    None,
    /// Reason-act-observe loop.
    React,
    /// Plan upfront, execute sub-goals sequentially.
    PlanExecute,
    /// Branch, score, follow the best candidate.
    TreeOfThought,
}

impl std::str::FromStr for PlanningStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "react" => Ok(Self::React),
            "plan_execute" => Ok(Self::PlanExecute),
            "tree_of_thought" => Ok(Self::TreeOfThought),
            other => Err(EngineError::Validation(format!(
                "unknown planning strategy '{}'",
                other
            ))),
        }
    }
}

/// Bounds that force a planning loop to stop without success. At least one
/// of the time or step bounds must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbortCriteria {
    pub max_time_seconds: Option<u64>,
    pub max_steps: Option<u32>,
    pub stop_on_tool_error: bool,
    pub no_progress_iterations: Option<u32>,
    pub confidence_threshold: Option<f32>,
}

impl AbortCriteria {
    pub fn validate(&self) -> Result<()> {
        if self.max_time_seconds.is_none() && self.max_steps.is_none() {
            return Err(EngineError::Validation(
                "abort criteria must set at least one of max_time_seconds or max_steps"
                    .to_string(),
            ));
        }
        if self.max_time_seconds == Some(0) {
            return Err(EngineError::Validation(
                "max_time_seconds must be positive".to_string(),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(EngineError::Validation(
                "max_steps must be positive".to_string(),
            ));
        }
        if self.no_progress_iterations == Some(0) {
            return Err(EngineError::Validation(
                "no_progress_iterations must be positive".to_string(),
            ));
        }
        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EngineError::Validation(format!(
                    "confidence_threshold must be within 0..=1, got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

impl Default for AbortCriteria {
    fn default() -> Self {
        Self {
            max_time_seconds: Some(300),
            max_steps: Some(10),
            stop_on_tool_error: false,
            no_progress_iterations: Some(3),
            confidence_threshold: None,
        }
    }
}

/// Model selection parameters captured per agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// A configured planning/execution identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Tool names this agent is allowed to invoke.
    pub capabilities: Vec<String>,
    pub model: ModelParams,
    pub planning_strategy: PlanningStrategy,
    pub max_planning_steps: u32,
    pub abort: AbortCriteria,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !AGENT_ID_PATTERN.is_match(&self.id) {
            return Err(EngineError::Validation(format!(
                "agent id '{}' must match {}",
                self.id,
                AGENT_ID_PATTERN.as_str()
            )));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("agent name must not be empty".to_string()));
        }
        if self.max_planning_steps == 0 {
            return Err(EngineError::Validation(
                "max_planning_steps must be positive".to_string(),
            ));
        }
        self.abort.validate()
    }

    /// Whether this agent may invoke the named tool.
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.capabilities.iter().any(|t| t == tool)
    }
}

/// Partial update applied through `AgentRegistry::update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub model: Option<ModelParams>,
    pub planning_strategy: Option<PlanningStrategy>,
    pub max_planning_steps: Option<u32>,
    pub abort: Option<AbortCriteria>,
}

/// Registry of agent configurations. Explicitly constructed and injected;
/// never a process-wide global.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentConfig>>,
    store: Arc<AgentStateStore>,
}

impl AgentRegistry {
    pub fn new(store: Arc<AgentStateStore>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub async fn register(&self, config: AgentConfig) -> Result<String> {
        config.validate()?;
        let mut agents = self.agents.write().await;
        if agents.contains_key(&config.id) {
            return Err(EngineError::Conflict(format!(
                "agent '{}' is already registered",
                config.id
            )));
        }
        let id = config.id.clone();
        tracing::info!("registered agent '{}' ({:?})", id, config.planning_strategy);
        agents.insert(id.clone(), config);
        Ok(id)
    }

    /// Apply a patch to a registered config. Tasks already in flight keep
    /// the snapshot taken at their start and are unaffected.
    pub async fn update(&self, agent_id: &str, patch: AgentConfigPatch) -> Result<AgentConfig> {
        let mut agents = self.agents.write().await;
        let current = agents
            .get(agent_id)
            .ok_or_else(|| EngineError::NotFound(format!("agent '{}'", agent_id)))?;

        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(capabilities) = patch.capabilities {
            updated.capabilities = capabilities;
        }
        if let Some(model) = patch.model {
            updated.model = model;
        }
        if let Some(strategy) = patch.planning_strategy {
            updated.planning_strategy = strategy;
        }
        if let Some(steps) = patch.max_planning_steps {
            updated.max_planning_steps = steps;
        }
        if let Some(abort) = patch.abort {
            updated.abort = abort;
        }
        updated.validate()?;

        agents.insert(agent_id.to_string(), updated.clone());
        tracing::info!("updated agent '{}'", agent_id);
        Ok(updated)
    }

    pub async fn remove(&self, agent_id: &str) -> Result<()> {
        {
            let agents = self.agents.read().await;
            if !agents.contains_key(agent_id) {
                return Err(EngineError::NotFound(format!("agent '{}'", agent_id)));
            }
        }
        if self.store.has_active_task(agent_id).await {
            return Err(EngineError::Conflict(format!(
                "agent '{}' has in-flight tasks",
                agent_id
            )));
        }
        let mut agents = self.agents.write().await;
        agents.remove(agent_id);
        tracing::info!("removed agent '{}'", agent_id);
        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Result<AgentConfig> {
        let agents = self.agents.read().await;
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("agent '{}'", agent_id)))
    }

    pub async fn list(&self) -> Vec<AgentConfig> {
        let agents = self.agents.read().await;
        let mut all: Vec<AgentConfig> = agents.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        let agents = self.agents.read().await;
        agents.contains_key(agent_id)
    }
}
