mod settings;

pub use settings::{LlmSettings, LoggingSettings, PlannerSettings, Settings, SystemSettings};
