//! In-memory archive backend. The default for tests and ephemeral runs.

use super::StateArchive;
use crate::error::Result;
use crate::state::TaskSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryArchive {
    snapshots: RwLock<HashMap<String, TaskSnapshot>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateArchive for InMemoryArchive {
    async fn archive(&self, snapshot: &TaskSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.current.task_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(task_id).cloned())
    }

    async fn task_ids(&self) -> Result<Vec<String>> {
        let snapshots = self.snapshots.read().await;
        let mut ids: Vec<String> = snapshots.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
