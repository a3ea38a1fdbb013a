use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub llm: LlmSettings,
    pub planner: PlannerSettings,
    pub system: SystemSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Internal retries for transient provider failures before the call
    /// counts as a failed step.
    pub provider_retries: u32,
    pub provider_backoff_base_ms: u64,
    /// Candidate branches generated per tree-of-thought iteration.
    pub tree_branching_factor: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Hard ceiling applied to collaboration sessions that set no explicit
    /// override and whose participants carry no time bound of their own.
    pub session_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("MAESTRO").separator("__"))
            .set_default("llm.api_base", "https://api.openai.com/v1")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.max_tokens", 1024i64)?
            .set_default("llm.temperature", 0.2)?
            .set_default("planner.provider_retries", 3i64)?
            .set_default("planner.provider_backoff_base_ms", 500i64)?
            .set_default("planner.tree_branching_factor", 3i64)?
            .set_default("system.session_timeout_secs", 600i64)?
            .set_default("logging.level", "info")?
            .build()?;

        config.try_deserialize()
    }

    pub fn api_key() -> Result<String> {
        env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LlmSettings {
                api_base: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 1024,
                temperature: 0.2,
            },
            planner: PlannerSettings {
                provider_retries: 3,
                provider_backoff_base_ms: 500,
                tree_branching_factor: 3,
            },
            system: SystemSettings {
                session_timeout_secs: 600,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let settings = Settings::default();
        assert!(settings.planner.provider_retries >= 1);
        assert!(settings.system.session_timeout_secs > 0);
        assert!(settings.planner.tree_branching_factor >= 2);
    }
}
