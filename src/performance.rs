//! Performance Tracker - Per-Agent Operational Metrics
//!
//! Information Hiding:
//! - Event log layout hidden behind record/summarize
//! - Percentile computation internalized
//!
//! Pure aggregation. Every component reports here; nothing reads back into
//! control flow. Unknown agents summarize to zeroed metrics, never an error.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PerfEvent {
    InvocationLatency { millis: u64 },
    ToolCall { success: bool },
    Success,
    Failure,
    TokensUsed { tokens: u32 },
}

/// Aggregated per-agent metrics over a requested window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetric {
    pub agent_id: String,
    pub window_secs: i64,
    pub invocation_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub tool_call_count: u64,
    pub tool_failure_count: u64,
    pub tokens_used: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    /// Rolling quality score: completed runs over all finished runs.
    pub quality_score: f64,
}

impl PerformanceMetric {
    fn zeroed(agent_id: &str, window: Duration) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            window_secs: window.num_seconds(),
            invocation_count: 0,
            success_count: 0,
            failure_count: 0,
            tool_call_count: 0,
            tool_failure_count: 0,
            tokens_used: 0,
            avg_latency_ms: 0.0,
            p50_latency_ms: 0,
            p95_latency_ms: 0,
            quality_score: 0.0,
        }
    }
}

struct TimestampedEvent {
    at: DateTime<Utc>,
    event: PerfEvent,
}

/// Append-only per-agent event log with windowed aggregation.
pub struct PerformanceTracker {
    events: RwLock<HashMap<String, Vec<TimestampedEvent>>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, agent_id: &str, event: PerfEvent) {
        let mut events = self.events.write().await;
        events
            .entry(agent_id.to_string())
            .or_default()
            .push(TimestampedEvent {
                at: Utc::now(),
                event,
            });
    }

    /// Aggregate counters and latency percentiles over the trailing window.
    /// Unknown agents get zeroed metrics.
    pub async fn summarize(&self, agent_id: &str, window: Duration) -> PerformanceMetric {
        let events = self.events.read().await;
        let Some(log) = events.get(agent_id) else {
            return PerformanceMetric::zeroed(agent_id, window);
        };

        let cutoff = Utc::now() - window;
        let mut metric = PerformanceMetric::zeroed(agent_id, window);
        let mut latencies: Vec<u64> = Vec::new();

        for entry in log.iter().filter(|e| e.at >= cutoff) {
            match &entry.event {
                PerfEvent::InvocationLatency { millis } => {
                    metric.invocation_count += 1;
                    latencies.push(*millis);
                }
                PerfEvent::ToolCall { success } => {
                    metric.tool_call_count += 1;
                    if !success {
                        metric.tool_failure_count += 1;
                    }
                }
                PerfEvent::Success => metric.success_count += 1,
                PerfEvent::Failure => metric.failure_count += 1,
                PerfEvent::TokensUsed { tokens } => metric.tokens_used += u64::from(*tokens),
            }
        }

        if !latencies.is_empty() {
            latencies.sort_unstable();
            let total: u64 = latencies.iter().sum();
            metric.avg_latency_ms = total as f64 / latencies.len() as f64;
            metric.p50_latency_ms = percentile(&latencies, 50);
            metric.p95_latency_ms = percentile(&latencies, 95);
        }

        let finished = metric.success_count + metric.failure_count;
        if finished > 0 {
            metric.quality_score = metric.success_count as f64 / finished as f64;
        }

        metric
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over a sorted sample.
fn percentile(sorted: &[u64], pct: u64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len() as u64).div_ceil(100);
    let index = rank.saturating_sub(1).min(sorted.len() as u64 - 1);
    sorted[index as usize]
}
