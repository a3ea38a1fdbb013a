//! Capability Registry - Tool Gateway Implementation
//!
//! Information Hiding:
//! - Capability storage and lookup hidden
//! - Individual capability execution internalized
//!
//! Hosts in-process capabilities behind the `ToolGateway` boundary. The
//! planner only ever sees the gateway trait; callers register capabilities
//! at engine construction time.

use super::{ToolGateway, ToolOutcome};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A single executable capability (search, calculator, file access, ...).
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn invoke(&self, params: Value) -> Result<ToolOutcome>;
}

/// Registry-backed `ToolGateway`. Unknown tool names fail with
/// `CapabilityNotFound`, which the planner treats as a tool failure.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        tracing::info!("registering capability '{}'", name);
        self.capabilities.insert(name, capability);
    }

    pub fn has(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Formatted capability list for model prompts.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .capabilities
            .values()
            .map(|c| format!("- {}: {}", c.name(), c.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolGateway for CapabilityRegistry {
    async fn execute(&self, tool_name: &str, params: Value) -> Result<ToolOutcome> {
        let capability = self.capabilities.get(tool_name).ok_or_else(|| {
            EngineError::CapabilityNotFound(format!("no capability named '{}'", tool_name))
        })?;

        tracing::debug!("executing capability '{}'", tool_name);
        capability.invoke(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input back"
        }

        async fn invoke(&self, params: Value) -> Result<ToolOutcome> {
            Ok(ToolOutcome::success(params.to_string()))
        }
    }

    #[tokio::test]
    async fn test_execute_registered_capability() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Echo));

        let outcome = registry.execute("echo", json!({"x": 1})).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("\"x\":1"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_capability_not_found() {
        let registry = CapabilityRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::CapabilityNotFound(_)));
    }

    #[test]
    fn test_describe_lists_capabilities() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Echo));
        assert!(registry.describe().contains("echo: Echoes"));
    }
}
