//! Task Memory - Versioned Key-Value Working Context
//!
//! The working memory an agent accumulates for one task: a flat key-value
//! map with a monotonically increasing revision counter. Every mutation
//! bumps the revision, which the planner's no-progress detection compares
//! across iterations. The format version tags serialized snapshots so
//! archived memories stay readable across releases.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const MEMORY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMemory {
    format_version: u32,
    revision: u64,
    entries: BTreeMap<String, Value>,
}

impl TaskMemory {
    pub fn new() -> Self {
        Self {
            format_version: MEMORY_FORMAT_VERSION,
            revision: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
        self.revision += 1;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Fold another memory's entries into this one. Colliding keys take the
    /// other memory's value.
    pub fn merge_from(&mut self, other: &TaskMemory) {
        if other.entries.is_empty() {
            return;
        }
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
        self.revision += 1;
    }

    /// Render the memory as a prompt context block, empty when there is
    /// nothing to say.
    pub fn to_prompt_context(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut block = String::from("Known context from earlier work:\n");
        for (key, value) in &self.entries {
            block.push_str(&format!("- {}: {}\n", key, value));
        }
        block.push('\n');
        block
    }
}

impl Default for TaskMemory {
    fn default() -> Self {
        Self::new()
    }
}
