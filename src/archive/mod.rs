//! State Archive - Terminal Snapshot Persistence
//!
//! When a run reaches a terminal status the engine archives the full task
//! snapshot (current state plus retained predecessors) for later audit.
//! Backends are pluggable behind `StateArchive`.

mod filesystem;
mod memory;

pub use filesystem::FilesystemArchive;
pub use memory::InMemoryArchive;

use crate::error::Result;
use crate::state::TaskSnapshot;
use async_trait::async_trait;

#[async_trait]
pub trait StateArchive: Send + Sync {
    /// Persist the snapshot under its task id, replacing any earlier
    /// archived version of the same task.
    async fn archive(&self, snapshot: &TaskSnapshot) -> Result<()>;

    async fn load(&self, task_id: &str) -> Result<Option<TaskSnapshot>>;

    async fn task_ids(&self) -> Result<Vec<String>>;
}
