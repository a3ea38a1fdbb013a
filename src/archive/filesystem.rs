//! Filesystem archive backend. One pretty-printed JSON document per task
//! under the archive directory, named after a sanitized task id.

use super::StateArchive;
use crate::error::{EngineError, Result};
use crate::state::TaskSnapshot;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct FilesystemArchive {
    dir: PathBuf,
}

impl FilesystemArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(task_id)))
    }
}

/// Task ids may contain separators like `::`; file names may not.
fn sanitize(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn io_error(context: &str, path: &Path, err: std::io::Error) -> EngineError {
    EngineError::Internal(format!("{} {}: {}", context, path.display(), err))
}

#[async_trait]
impl StateArchive for FilesystemArchive {
    async fn archive(&self, snapshot: &TaskSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("failed to create archive dir", &self.dir, e))?;

        let path = self.path_for(&snapshot.current.task_id);
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| EngineError::Internal(format!("failed to encode snapshot: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_error("failed to write archive", &path, e))?;
        tracing::debug!("archived task '{}' to {}", snapshot.current.task_id, path.display());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        let path = self.path_for(task_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("failed to read archive", &path, e)),
        };
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Internal(format!("corrupt archive {}: {}", path.display(), e)))?;
        Ok(Some(snapshot))
    }

    async fn task_ids(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("failed to list archive dir", &self.dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("failed to list archive dir", &self.dir, e))?
        {
            let name = entry.file_name();
            if let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
