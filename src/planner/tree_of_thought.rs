//! Tree-of-Thought Strategy
//!
//! Per iteration: generate a small fixed number of candidate next-step
//! branches, score each with the model-provided confidence or a lightweight
//! heuristic, and continue only down the highest-scoring branch. Bounded by
//! the same step and time limits as react.

use super::{
    capability_block, decision_protocol, AbortReason, ModelCall, PlanContext, PlanStrategy,
    StrategyOutcome,
};
use crate::error::Result;
use crate::gateway::{ChatMessage, ModelReply};
use crate::state::ActionRecord;
use async_trait::async_trait;
use serde_json::json;

pub(crate) struct TreeOfThoughtStrategy {
    pub(crate) branching_factor: usize,
}

impl TreeOfThoughtStrategy {
    /// Model-provided confidence wins; otherwise prefer actionable branches
    /// over pure reflection.
    fn score(reply: &ModelReply) -> f32 {
        if let Some(confidence) = reply.confidence {
            return confidence;
        }
        if reply.is_final {
            0.7
        } else if reply.tool_call.is_some() {
            0.6
        } else {
            0.4
        }
    }
}

#[async_trait]
impl PlanStrategy for TreeOfThoughtStrategy {
    async fn execute(&self, cx: &mut PlanContext<'_>) -> Result<StrategyOutcome> {
        let system_prompt = format!(
            "You are one branch of a deliberate search over next steps. Propose a \
             single candidate next step for the task and rate your confidence in it \
             (the \"confidence\" field, 0 to 1).\n\n{}\n\n{}",
            capability_block(cx.config),
            decision_protocol()
        );
        let mut trail: Vec<String> = Vec::new();

        loop {
            if let Some(reason) = cx.check_abort() {
                return Ok(StrategyOutcome::Aborted { reason });
            }

            let memory_context = cx.memory_context().await?;
            let trail_block = if trail.is_empty() {
                String::new()
            } else {
                format!("Steps taken so far:\n{}\n", trail.join("\n"))
            };

            // Branch: independent candidate proposals for the same position.
            let mut candidates: Vec<ModelReply> = Vec::new();
            for branch in 0..self.branching_factor {
                let messages = vec![
                    ChatMessage::system(system_prompt.clone()),
                    ChatMessage::user(format!(
                        "{}{}Task: {}\nPropose candidate #{}, distinct from other \
                         plausible candidates.",
                        memory_context,
                        trail_block,
                        cx.goal,
                        branch + 1
                    )),
                ];
                match cx.consult_model(messages).await? {
                    ModelCall::Reply(reply) => candidates.push(reply),
                    ModelCall::Cancelled => {
                        return Ok(StrategyOutcome::Aborted {
                            reason: AbortReason::Cancelled,
                        })
                    }
                    ModelCall::Exhausted(error) => {
                        tracing::warn!("branch {} generation failed: {}", branch + 1, error);
                    }
                }
            }

            if candidates.is_empty() {
                // Every branch failed: a failed step toward no-progress.
                cx.record_step("all candidate branches failed", None, None, false)
                    .await?;
                continue;
            }

            // Score and keep only the best branch; the rest are discarded.
            let Some(best) = candidates.into_iter().max_by(|a, b| {
                Self::score(a)
                    .partial_cmp(&Self::score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }) else {
                continue;
            };

            if best.is_final || cx.confidence_met(&best) {
                let answer = best.text.clone();
                cx.remember("final_answer", json!(answer.clone())).await?;
                cx.record_step(best.text, None, Some(answer.clone()), false)
                    .await?;
                return Ok(StrategyOutcome::Completed { output: answer });
            }

            if let Some(call) = best.tool_call.clone() {
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
                if outcome.success {
                    cx.remember(
                        format!("observation_{}", cx.steps_taken()),
                        json!(observation.clone()),
                    )
                    .await?;
                }
                trail.push(format!("- {} -> {}", best.text, observation));
                cx.record_step(
                    best.text,
                    Some(ActionRecord {
                        tool: call.tool,
                        input: call.input,
                    }),
                    Some(observation),
                    !outcome.success,
                )
                .await?;
            } else {
                trail.push(format!("- {}", best.text));
                cx.record_step(best.text, None, None, false).await?;
            }
        }
    }
}
