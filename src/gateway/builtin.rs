//! Built-in capabilities available to the CLI binary.

use super::capability::{Capability, CapabilityRegistry};
use super::ToolOutcome;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Registry pre-loaded with every built-in capability.
pub fn builtin_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(Calculator));
    registry.register(Arc::new(Clock));
    registry.register(Arc::new(HttpGet::new()));
    registry
}

#[derive(Debug, Deserialize)]
struct CalculatorInput {
    op: String,
    a: f64,
    b: f64,
}

struct Calculator;

#[async_trait]
impl Capability for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Arithmetic on two numbers. Input: {\"op\": \"add|sub|mul|div\", \"a\": 1, \"b\": 2}"
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome> {
        let input: CalculatorInput = match serde_json::from_value(params) {
            Ok(input) => input,
            Err(e) => return Ok(ToolOutcome::failure(format!("bad calculator input: {}", e))),
        };
        let result = match input.op.as_str() {
            "add" => input.a + input.b,
            "sub" => input.a - input.b,
            "mul" => input.a * input.b,
            "div" => {
                if input.b == 0.0 {
                    return Ok(ToolOutcome::failure("division by zero"));
                }
                input.a / input.b
            }
            other => return Ok(ToolOutcome::failure(format!("unknown op '{}'", other))),
        };
        Ok(ToolOutcome::success(result.to_string()))
    }
}

struct Clock;

#[async_trait]
impl Capability for Clock {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Current UTC time in RFC 3339 format. Input: {}"
    }

    async fn invoke(&self, _params: Value) -> Result<ToolOutcome> {
        Ok(ToolOutcome::success(chrono::Utc::now().to_rfc3339()))
    }
}

#[derive(Debug, Deserialize)]
struct HttpGetInput {
    url: String,
}

struct HttpGet {
    client: reqwest::Client,
}

impl HttpGet {
    fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

const HTTP_BODY_LIMIT: usize = 4096;

/// Cap the body at `limit` bytes, backing the cut off any multi-byte
/// character straddling the limit.
fn truncate_body(body: &mut String, limit: usize) {
    if body.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    body.push_str("... [truncated]");
}

#[async_trait]
impl Capability for HttpGet {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return the response body. Input: {\"url\": \"https://...\"}"
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome> {
        let input: HttpGetInput = match serde_json::from_value(params) {
            Ok(input) => input,
            Err(e) => return Ok(ToolOutcome::failure(format!("bad http_get input: {}", e))),
        };
        let response = match self.client.get(&input.url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolOutcome::failure(format!("request failed: {}", e))),
        };
        if !response.status().is_success() {
            return Ok(ToolOutcome::failure(format!(
                "request to {} returned {}",
                input.url,
                response.status()
            )));
        }
        let mut body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(ToolOutcome::failure(format!("failed to read body: {}", e))),
        };
        truncate_body(&mut body, HTTP_BODY_LIMIT);
        Ok(ToolOutcome::success(body))
    }
}
