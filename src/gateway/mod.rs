//! External Gateways - Model and Tool Boundaries
//!
//! Information Hiding:
//! - Provider wire formats hidden behind `ModelGateway`
//! - Tool execution details hidden behind `ToolGateway`
//!
//! The engine consumes the language-model layer and the tool/capability
//! layer as opaque capabilities with typed request/result contracts. Tests
//! and collaboration wrappers supply their own implementations.

pub mod builtin;
pub mod capability;
pub mod openai;

use crate::error::Result;
use crate::registry::ModelParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub params: ModelParams,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    pub input: Value,
}

/// Structured model reply. `text` carries the reasoning step or the final
/// answer; `is_final` signals completion; `confidence` is optional and
/// model-provided.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    /// Unparsed provider text, for callers that expect a non-decision
    /// document (e.g. a plan outline).
    pub raw: String,
    pub tool_call: Option<ToolCallRequest>,
    pub confidence: Option<f32>,
    pub is_final: bool,
    pub tokens_used: Option<u32>,
}

impl ModelReply {
    pub fn final_answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text,
            tool_call: None,
            confidence: None,
            is_final: true,
            tokens_used: None,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text,
            tool_call: None,
            confidence: None,
            is_final: false,
            tokens_used: None,
        }
    }

    pub fn tool_call(text: impl Into<String>, tool: impl Into<String>, input: Value) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text,
            tool_call: Some(ToolCallRequest {
                tool: tool.into(),
                input,
            }),
            confidence: None,
            is_final: false,
            tokens_used: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Model invocation boundary. May fail with a retryable `Provider` error or
/// a non-retryable `ProviderQuota` error.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelReply>;
}

/// Result of a tool execution at the capability boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Tool/capability execution boundary. Unknown tool names fail with
/// `CapabilityNotFound`.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn execute(&self, tool_name: &str, params: Value) -> Result<ToolOutcome>;
}
