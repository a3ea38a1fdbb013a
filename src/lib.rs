//! Maestro - multi-agent orchestration and planning engine
//!
//! Runs configured agents against goals through bounded planning loops
//! (react, plan-execute, tree-of-thought, or a single direct pass), tracks
//! their operational metrics, and coordinates work across agents via
//! handoff and collaboration sessions.
//!
//! Everything is explicitly constructed: build an [`Engine`] with your own
//! model gateway, tool gateway, and archive backend, and register agents on
//! it. There is no process-wide engine.

pub mod archive;
pub mod cli;
pub mod collaboration;
mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handoff;
pub mod memory;
pub mod performance;
pub mod planner;
pub mod registry;
pub mod state;
pub mod utils;

pub use config::{LlmSettings, LoggingSettings, PlannerSettings, Settings, SystemSettings};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use planner::PlannerResult;
pub use registry::{AbortCriteria, AgentConfig, AgentConfigPatch, ModelParams, PlanningStrategy};
pub use state::{AgentState, TaskSnapshot, TaskStatus};
