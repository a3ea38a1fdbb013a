//! ReAct Strategy - Reason, Act, Observe
//!
//! The core autonomous loop: ask the model for the next reasoning step and
//! optional tool call, execute the tool, feed the observation back, repeat
//! until the model signals completion or the abort criteria fire.

use super::{
    capability_block, decision_protocol, AbortReason, ModelCall, PlanContext, PlanStrategy,
    StrategyOutcome,
};
use crate::error::Result;
use crate::gateway::ChatMessage;
use crate::state::ActionRecord;
use async_trait::async_trait;
use serde_json::json;

pub(crate) struct ReactStrategy;

#[async_trait]
impl PlanStrategy for ReactStrategy {
    async fn execute(&self, cx: &mut PlanContext<'_>) -> Result<StrategyOutcome> {
        let system_prompt = format!(
            "You are an autonomous agent that accomplishes tasks step by step.\n\n\
             {}\n\n{}",
            capability_block(cx.config),
            decision_protocol()
        );

        let memory_context = cx.memory_context().await?;
        let mut conversation = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(format!("{}Task: {}", memory_context, cx.goal)),
        ];

        loop {
            if let Some(reason) = cx.check_abort() {
                return Ok(StrategyOutcome::Aborted { reason });
            }

            let reply = match cx.consult_model(conversation.clone()).await? {
                ModelCall::Reply(reply) => reply,
                ModelCall::Cancelled => {
                    return Ok(StrategyOutcome::Aborted {
                        reason: AbortReason::Cancelled,
                    })
                }
                ModelCall::Exhausted(error) => {
                    // Failed step: no observation, no memory change.
                    let note = format!("model call failed: {}", error);
                    conversation.push(ChatMessage::assistant(note.clone()));
                    cx.record_step(note, None, None, false).await?;
                    continue;
                }
            };

            if reply.is_final || cx.confidence_met(&reply) {
                let answer = reply.text.clone();
                cx.remember("final_answer", json!(answer.clone())).await?;
                cx.record_step(reply.text, None, Some(answer.clone()), false)
                    .await?;
                return Ok(StrategyOutcome::Completed { output: answer });
            }

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
                    format!(
                        "Tool failed: {}",
                        outcome.error.clone().unwrap_or_default()
                    )
                };

                if outcome.success {
                    cx.remember(
                        format!("observation_{}", cx.steps_taken()),
                        json!(observation.clone()),
                    )
                    .await?;
                }

                conversation.push(ChatMessage::assistant(
                    json!({
                        "thought": reply.text,
                        "action": {"tool": call.tool, "input": call.input},
                        "is_final": false,
                    })
                    .to_string(),
                ));
                conversation.push(ChatMessage::user(format!(
                    "Observation: {}\n\nDoes this observation answer the original task? \
                     If yes, set is_final=true and provide final_answer. \
                     If no, what is the next action?",
                    observation
                )));

                cx.record_step(
                    reply.text,
                    Some(ActionRecord {
                        tool: call.tool,
                        input: call.input,
                    }),
                    Some(observation),
                    !outcome.success,
                )
                .await?;
            } else {
                // Thought without an action: nudge the model toward either a
                // tool call or completion; counts toward the no-progress
                // window when nothing new was learned.
                conversation.push(ChatMessage::assistant(reply.text.clone()));
                conversation.push(ChatMessage::user(
                    "No action was taken. Either call a tool or finish with is_final=true."
                        .to_string(),
                ));
                cx.record_step(reply.text, None, None, false).await?;
            }
        }
    }
}
