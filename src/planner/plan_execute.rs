//! Plan-Execute Strategy
//!
//! Obtain a full ordered plan of sub-goals in one model call, then execute
//! each sub-goal sequentially through the gateways. Re-plans the remaining
//! sub-goals only when a step fails and `stop_on_tool_error` is unset.

use super::{
    capability_block, decision_protocol, extract_json, AbortReason, ModelCall, PlanContext,
    PlanStrategy, StrategyOutcome,
};
use crate::error::Result;
use crate::gateway::ChatMessage;
use crate::state::ActionRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct PlanOutline {
    plan: Vec<SubGoal>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubGoal {
    #[serde(default)]
    id: String,
    description: String,
}

pub(crate) struct PlanExecuteStrategy;

impl PlanExecuteStrategy {
    async fn obtain_plan(
        &self,
        cx: &mut PlanContext<'_>,
        revision_note: Option<&str>,
    ) -> Result<Option<Vec<SubGoal>>> {
        let memory_context = cx.memory_context().await?;
        let note = revision_note
            .map(|n| format!("\n\nA previous step failed: {}. Revise the remaining plan.", n))
            .unwrap_or_default();
        let messages = vec![
            ChatMessage::system(format!(
                "You are a planner. Decompose the task into a short ordered list of \
                 sub-goals.\n\n{}\n\n\
                 Respond with JSON only, in this format:\n\
                 {{\"plan\": [{{\"id\": \"sg1\", \"description\": \"...\"}}]}}",
                capability_block(cx.config)
            )),
            ChatMessage::user(format!("{}Task: {}{}", memory_context, cx.goal, note)),
        ];

        match cx.consult_model(messages).await? {
            ModelCall::Reply(reply) => {
                let outline = extract_json::<PlanOutline>(&reply.raw);
                let mut sub_goals = match outline {
                    Some(outline) if !outline.plan.is_empty() => outline.plan,
                    // Unparseable or empty plan: fall back to treating the
                    // whole goal as one sub-goal.
                    _ => vec![SubGoal {
                        id: String::new(),
                        description: cx.goal.to_string(),
                    }],
                };
                for (index, sub_goal) in sub_goals.iter_mut().enumerate() {
                    if sub_goal.id.is_empty() {
                        sub_goal.id = format!("sg{}", index + 1);
                    }
                }
                cx.record_step(
                    format!("planned {} sub-goals", sub_goals.len()),
                    None,
                    Some(
                        sub_goals
                            .iter()
                            .map(|g| g.description.as_str())
                            .collect::<Vec<_>>()
                            .join("; "),
                    ),
                    false,
                )
                .await?;
                Ok(Some(sub_goals))
            }
            ModelCall::Cancelled => Ok(None),
            ModelCall::Exhausted(error) => {
                cx.record_step(format!("planning call failed: {}", error), None, None, false)
                    .await?;
                Ok(Some(vec![SubGoal {
                    id: "sg1".to_string(),
                    description: cx.goal.to_string(),
                }]))
            }
        }
    }
}

#[async_trait]
impl PlanStrategy for PlanExecuteStrategy {
    async fn execute(&self, cx: &mut PlanContext<'_>) -> Result<StrategyOutcome> {
        if let Some(reason) = cx.check_abort() {
            return Ok(StrategyOutcome::Aborted { reason });
        }

        let mut queue = match self.obtain_plan(cx, None).await? {
            Some(plan) => plan,
            None => {
                return Ok(StrategyOutcome::Aborted {
                    reason: AbortReason::Cancelled,
                })
            }
        };

        let system_prompt = format!(
            "You are executing one sub-goal of a larger plan.\n\n{}\n\n{}",
            capability_block(cx.config),
            decision_protocol()
        );
        let mut results: Vec<(String, String)> = Vec::new();

        while let Some(sub_goal) = queue.first().cloned() {
            if let Some(reason) = cx.check_abort() {
                return Ok(StrategyOutcome::Aborted { reason });
            }

            let memory_context = cx.memory_context().await?;
            let completed: String = results
                .iter()
                .map(|(id, result)| format!("- {}: {}\n", id, result))
                .collect();
            let messages = vec![
                ChatMessage::system(system_prompt.clone()),
                ChatMessage::user(format!(
                    "{}Overall task: {}\nCompleted sub-goals:\n{}\nCurrent sub-goal: {}",
                    memory_context, cx.goal, completed, sub_goal.description
                )),
            ];

            let reply = match cx.consult_model(messages).await? {
                ModelCall::Reply(reply) => reply,
                ModelCall::Cancelled => {
                    return Ok(StrategyOutcome::Aborted {
                        reason: AbortReason::Cancelled,
                    })
                }
                ModelCall::Exhausted(error) => {
                    cx.record_step(
                        format!("sub-goal '{}' model call failed: {}", sub_goal.id, error),
                        None,
                        None,
                        false,
                    )
                    .await?;
                    continue;
                }
            };

            let (result, step_failed, action) = if let Some(call) = reply.tool_call.clone() {
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
                let action = ActionRecord {
                    tool: call.tool,
                    input: call.input,
                };
                (observation, !outcome.success, Some(action))
            } else {
                (reply.text.clone(), false, None)
            };

            if step_failed {
                cx.record_step(reply.text.clone(), action, Some(result.clone()), true)
                    .await?;
                if cx.config.abort.stop_on_tool_error {
                    return Ok(StrategyOutcome::Aborted {
                        reason: AbortReason::ToolError,
                    });
                }
                tracing::warn!(
                    "sub-goal '{}' failed for task '{}', re-planning",
                    sub_goal.id,
                    cx.task_id
                );
                queue = match self.obtain_plan(cx, Some(&result)).await? {
                    Some(plan) => plan,
                    None => {
                        return Ok(StrategyOutcome::Aborted {
                            reason: AbortReason::Cancelled,
                        })
                    }
                };
                continue;
            }

            // Memory write first so the step mark carries the new revision.
            cx.remember(format!("sub_goal_{}", sub_goal.id), json!(result.clone()))
                .await?;
            cx.record_step(reply.text.clone(), action, Some(result.clone()), false)
                .await?;
            results.push((sub_goal.id.clone(), result));
            queue.remove(0);
        }

        let output = results
            .iter()
            .map(|(id, result)| format!("[{}] {}", id, result))
            .collect::<Vec<_>>()
            .join("\n");
        cx.remember("final_answer", json!(output.clone())).await?;
        Ok(StrategyOutcome::Completed { output })
    }
}
