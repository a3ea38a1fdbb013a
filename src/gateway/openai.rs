//! OpenAI-Compatible Model Gateway
//!
//! Information Hiding:
//! - HTTP wire format and retry strategy hidden
//! - Decision-JSON extraction hidden behind `ModelReply`
//!
//! Talks to any chat-completions endpoint. Transient transport failures are
//! retried with exponential backoff; HTTP 429 maps to the non-retryable
//! quota error so the planner gives up on the current task instead of
//! hammering the provider.

use super::{ModelGateway, ModelReply, ModelRequest, ToolCallRequest};
use crate::config::Settings;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<super::ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// Decision structure the planner asks the model to emit.
#[derive(Debug, Deserialize)]
struct Decision {
    #[serde(default)]
    thought: String,
    action: Option<DecisionAction>,
    #[serde(default)]
    is_final: bool,
    final_answer: Option<String>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct DecisionAction {
    tool: String,
    #[serde(default)]
    input: Value,
}

pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    settings: Settings,
}

impl OpenAiGateway {
    pub fn new(api_key: String, settings: Settings) -> Self {
        Self {
            client: Client::new(),
            api_key,
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.llm.api_base)
    }

    /// Turn raw model text into a structured reply. Models occasionally wrap
    /// the JSON in prose, so fall back to extracting the outermost braces;
    /// if no decision can be parsed at all, the text becomes a plain
    /// reasoning step.
    fn parse_reply(text: &str, tokens_used: Option<u32>) -> ModelReply {
        if let Some(decision) = Self::parse_decision(text) {
            let reply_text = if decision.is_final {
                decision
                    .final_answer
                    .unwrap_or_else(|| decision.thought.clone())
            } else {
                decision.thought
            };
            return ModelReply {
                text: reply_text,
                raw: text.to_string(),
                tool_call: decision.action.map(|a| ToolCallRequest {
                    tool: a.tool,
                    input: a.input,
                }),
                confidence: decision.confidence,
                is_final: decision.is_final,
                tokens_used,
            };
        }

        tracing::warn!("model reply was not decision JSON, treating as plain thought");
        ModelReply {
            text: text.to_string(),
            raw: text.to_string(),
            tool_call: None,
            confidence: None,
            is_final: false,
            tokens_used,
        }
    }

    fn parse_decision(text: &str) -> Option<Decision> {
        if let Ok(decision) = serde_json::from_str::<Decision>(text) {
            return Some(decision);
        }
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<Decision>(&text[start..=end]).ok()
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelReply> {
        let body = ChatCompletionRequest {
            model: request.params.model.clone(),
            messages: request.messages,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::provider(format!("http request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::ProviderQuota(detail));
        }
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            tracing::warn!("provider returned status {}: {}", status, detail);
            // Client errors other than 429 will not heal on retry.
            if status.is_client_error() {
                return Err(EngineError::provider_fatal(format!(
                    "provider rejected request ({}): {}",
                    status, detail
                )));
            }
            return Err(EngineError::provider(format!(
                "provider error ({}): {}",
                status, detail
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::provider(format!("failed to decode response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::provider("provider returned no choices"))?;

        Ok(Self::parse_reply(
            &choice.message.content,
            parsed.usage.map(|u| u.total_tokens),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reply_tool_call() {
        let text = r#"{"thought": "need to search", "action": {"tool": "search", "input": {"q": "x"}}, "is_final": false, "final_answer": null}"#;
        let reply = OpenAiGateway::parse_reply(text, Some(12));

        assert!(!reply.is_final);
        assert_eq!(reply.text, "need to search");
        let call = reply.tool_call.unwrap();
        assert_eq!(call.tool, "search");
        assert_eq!(call.input, json!({"q": "x"}));
        assert_eq!(reply.tokens_used, Some(12));
    }

    #[test]
    fn test_parse_reply_final_answer() {
        let text = r#"{"thought": "done", "action": null, "is_final": true, "final_answer": "x = 42", "confidence": 0.93}"#;
        let reply = OpenAiGateway::parse_reply(text, None);

        assert!(reply.is_final);
        assert_eq!(reply.text, "x = 42");
        assert_eq!(reply.confidence, Some(0.93));
    }

    #[test]
    fn test_parse_reply_json_wrapped_in_prose() {
        let text = "Sure, here is my answer:\n{\"thought\": \"t\", \"is_final\": true, \"final_answer\": \"ok\"}\nHope that helps.";
        let reply = OpenAiGateway::parse_reply(text, None);
        assert!(reply.is_final);
        assert_eq!(reply.text, "ok");
    }

    #[test]
    fn test_parse_reply_plain_text_fallback() {
        let reply = OpenAiGateway::parse_reply("just rambling, no json", None);
        assert!(!reply.is_final);
        assert!(reply.tool_call.is_none());
        assert_eq!(reply.text, "just rambling, no json");
    }
}
