//! File-based CheckpointRepository implementation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leaderboard_core::{SequenceNumber, ShardCheckpoint, ShardId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::repository::{CheckpointRepository, RepositoryError, Result};

/// On-disk layout: one JSON document per stream.
///
/// ```text
/// {base_dir}/checkpoints_{stream_id}.json
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointDocument {
    stream_id: String,
    shards: BTreeMap<ShardId, ShardPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardPosition {
    sequence_number: SequenceNumber,
    updated_at: DateTime<Utc>,
}

/// File-based implementation of CheckpointRepository.
///
/// Every `put` rewrites the stream document to a temp file and renames it
/// over the previous one, so a crash leaves either the old or the new
/// document, never a torn one. Writers are serialized by an async mutex.
pub struct FileCheckpointRepository {
    stream_id: String,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointRepository {
    /// Create a new file-based checkpoint repository for one stream.
    pub fn new(base_dir: impl AsRef<Path>, stream_id: impl Into<String>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(RepositoryError::Io)?;

        let stream_id = stream_id.into();
        let path = base_dir.join(format!("checkpoints_{}.json", sanitize(&stream_id)));
        Ok(Self {
            stream_id,
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the stream document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_document(&self) -> Result<CheckpointDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => {
                let document: CheckpointDocument = serde_json::from_str(&json)
                    .map_err(|e| RepositoryError::Json(e.to_string()))?;
                if document.stream_id != self.stream_id {
                    return Err(RepositoryError::CorruptedData(format!(
                        "{} belongs to stream '{}', expected '{}'",
                        self.path.display(),
                        document.stream_id,
                        self.stream_id
                    )));
                }
                Ok(document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointDocument {
                stream_id: self.stream_id.clone(),
                shards: BTreeMap::new(),
            }),
            Err(e) => Err(RepositoryError::Io(e)),
        }
    }

    async fn save_document(&self, document: &CheckpointDocument) -> Result<()> {
        let temp_path = self.path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| RepositoryError::Json(e.to_string()))?;
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(RepositoryError::Io)?;

        // Atomic rename
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(RepositoryError::Io)?;

        tracing::debug!("Saved checkpoints: {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl CheckpointRepository for FileCheckpointRepository {
    async fn get(&self, shard_id: &str) -> Result<Option<SequenceNumber>> {
        let document = self.load_document().await?;
        Ok(document
            .shards
            .get(shard_id)
            .map(|position| position.sequence_number.clone()))
    }

    async fn put(&self, checkpoint: &ShardCheckpoint) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load_document().await?;

        if let Some(current) = document.shards.get(&checkpoint.shard_id)
            && current.sequence_number >= checkpoint.last_sequence_number
        {
            return Ok(false);
        }

        document.shards.insert(
            checkpoint.shard_id.clone(),
            ShardPosition {
                sequence_number: checkpoint.last_sequence_number.clone(),
                updated_at: Utc::now(),
            },
        );
        self.save_document(&document).await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<ShardCheckpoint>> {
        let document = self.load_document().await?;
        Ok(document
            .shards
            .into_iter()
            .map(|(shard_id, position)| ShardCheckpoint::new(shard_id, position.sequence_number))
            .collect())
    }
}

/// Keeps stream ids usable as file names.
fn sanitize(stream_id: &str) -> String {
    stream_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
