use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::Result;
use crate::player::SnapshotBatch;

/// Anything that can hand the engine one refresh worth of player and fixture data.
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self) -> Result<SnapshotBatch>;
}

/// Reads a `SnapshotBatch` JSON file written by the collector.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotSource for JsonFileSource {
    fn name(&self) -> &str {
        "json_file"
    }

    fn fetch(&self) -> Result<SnapshotBatch> {
        let raw = fs::read_to_string(&self.path)?;
        let batch: SnapshotBatch = serde_json::from_str(&raw)?;
        debug!(path = %self.path.display(), players = batch.players.len(), "loaded snapshot batch");
        Ok(finalize_batch(batch))
    }
}

/// Fixed batch held in memory; used by tests, benches and demos.
#[derive(Debug, Clone)]
pub struct StaticSource {
    batch: SnapshotBatch,
}

impl StaticSource {
    pub fn new(batch: SnapshotBatch) -> Self {
        Self { batch }
    }
}

impl SnapshotSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self) -> Result<SnapshotBatch> {
        Ok(finalize_batch(self.batch.clone()))
    }
}

/// Stamp players with the batch version and keep the first row per player id.
pub fn finalize_batch(mut batch: SnapshotBatch) -> SnapshotBatch {
    let version = batch.data_version;
    let mut seen = HashSet::new();
    batch.players.retain(|p| {
        let fresh = seen.insert(p.id);
        if !fresh {
            warn!(player_id = p.id, "duplicate player row dropped");
        }
        fresh
    });
    for p in &mut batch.players {
        if p.data_version == 0 {
            p.data_version = version;
        }
    }
    batch
}
