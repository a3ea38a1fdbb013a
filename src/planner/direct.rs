//! Direct Strategy - Single Gateway Pass
//!
//! The `none` planning strategy: delegate the whole task to one model call
//! with an optional single tool pass, then return. No loop.

use super::{
    capability_block, decision_protocol, AbortReason, ModelCall, PlanContext, PlanStrategy,
    StrategyOutcome,
};
use crate::error::{EngineError, Result};
use crate::gateway::ChatMessage;
use crate::state::ActionRecord;
use async_trait::async_trait;
use serde_json::json;

pub(crate) struct DirectStrategy;

#[async_trait]
impl PlanStrategy for DirectStrategy {
    async fn execute(&self, cx: &mut PlanContext<'_>) -> Result<StrategyOutcome> {
        if let Some(reason) = cx.check_abort() {
            return Ok(StrategyOutcome::Aborted { reason });
        }

        let system_prompt = format!(
            "You are an agent answering a task in a single pass.\n\n{}\n\n{}",
            capability_block(cx.config),
            decision_protocol()
        );
        let memory_context = cx.memory_context().await?;
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(format!("{}Task: {}", memory_context, cx.goal)),
        ];

        let reply = match cx.consult_model(messages).await? {
            ModelCall::Reply(reply) => reply,
            ModelCall::Cancelled => {
                return Ok(StrategyOutcome::Aborted {
                    reason: AbortReason::Cancelled,
                })
            }
            // With no loop there is nothing to count toward no-progress;
            // an exhausted provider fails the run outright.
            ModelCall::Exhausted(error) => {
                return Err(EngineError::provider_fatal(format!(
                    "model unavailable for single-pass task: {}",
                    error
                )))
            }
        };

        // Optional single tool pass.
        if let Some(call) = reply.tool_call.clone() {
            let outcome = match cx.invoke_tool(&call.tool, call.input.clone()).await? {
                Some(outcome) => outcome,
                None => {
                    return Ok(StrategyOutcome::Aborted {
                        reason: AbortReason::Cancelled,
                    })
                }
            };

            let observation = if outcome.success {
                outcome.output.clone()
            } else {
                format!("Tool failed: {}", outcome.error.clone().unwrap_or_default())
            };
            cx.remember("final_answer", json!(observation.clone())).await?;
            cx.record_step(
                reply.text,
                Some(ActionRecord {
                    tool: call.tool,
                    input: call.input,
                }),
                Some(observation.clone()),
                !outcome.success,
            )
            .await?;
            return Ok(StrategyOutcome::Completed { output: observation });
        }

        let answer = reply.text.clone();
        cx.remember("final_answer", json!(answer.clone())).await?;
        cx.record_step(reply.text, None, Some(answer.clone()), false)
            .await?;
        Ok(StrategyOutcome::Completed { output: answer })
    }
}
