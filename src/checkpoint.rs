use crate::config::CHECKPOINT_VERSION;
use crate::stats::BatchStats;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct CheckpointStats {
    pub pages_fetched: u64,
    pub posts_fetched: u64,
}

/// Where an interrupted download stream can pick up again.
#[derive(Serialize, Deserialize, Debug)]
pub struct Checkpoint {
    pub version: u32,
    pub query_fingerprint: String,
    pub prefix: String,
    pub output_dir: String,
    pub next_cursor: String,
    pub stats: CheckpointStats,
}

pub fn checkpoint_path(output_dir: &str, prefix: &str) -> PathBuf {
    Path::new(output_dir).join(format!("{}.checkpoint", prefix))
}

pub fn load_if_valid(
    query_fingerprint: &str,
    prefix: &str,
    output_dir: &str,
) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(output_dir, prefix);

    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let file = File::open(&path).context("Failed to open checkpoint file")?;
    let reader = BufReader::new(file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let checkpoint: Checkpoint = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Checkpoint file is corrupt or unreadable");
            return Ok(None);
        }
    };

    if checkpoint.version != CHECKPOINT_VERSION {
        info!(
            cached = checkpoint.version,
            current = CHECKPOINT_VERSION,
            "Checkpoint version mismatch"
        );
        return Ok(None);
    }

    if checkpoint.query_fingerprint != query_fingerprint {
        info!(
            cached = checkpoint.query_fingerprint,
            current = query_fingerprint,
            "Checkpoint query mismatch"
        );
        return Ok(None);
    }

    if checkpoint.prefix != prefix || checkpoint.output_dir != output_dir {
        info!(
            cached_prefix = checkpoint.prefix,
            cached_output = checkpoint.output_dir,
            "Checkpoint shard location mismatch"
        );
        return Ok(None);
    }

    info!(
        cursor = checkpoint.next_cursor,
        pages = checkpoint.stats.pages_fetched,
        "Loaded valid checkpoint"
    );

    Ok(Some(checkpoint))
}

pub fn clear(output_dir: &str, prefix: &str) -> Result<()> {
    let path = checkpoint_path(output_dir, prefix);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove checkpoint file: {:?}", path))?;
        info!("Checkpoint cleared");
    }
    Ok(())
}

pub struct CheckpointManager {
    checkpoint_path: PathBuf,
    query_fingerprint: String,
    prefix: String,
    output_dir: String,
}

impl CheckpointManager {
    pub fn new(query_fingerprint: &str, prefix: &str, output_dir: &str) -> Self {
        Self {
            checkpoint_path: checkpoint_path(output_dir, prefix),
            query_fingerprint: query_fingerprint.to_string(),
            prefix: prefix.to_string(),
            output_dir: output_dir.to_string(),
        }
    }

    /// Writes via a temp file and rename so a crash never leaves a torn checkpoint.
    pub fn save(&self, next_cursor: &str, stats: &BatchStats) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            query_fingerprint: self.query_fingerprint.clone(),
            prefix: self.prefix.clone(),
            output_dir: self.output_dir.clone(),
            next_cursor: next_cursor.to_string(),
            stats: stats.to_checkpoint(),
        };

        if let Some(parent) = self.checkpoint_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let tmp_path = self.checkpoint_path.with_extension("checkpoint.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp checkpoint file: {:?}", tmp_path))?;
        let writer = BufWriter::new(file);

        bincode::DefaultOptions::new()
            .serialize_into(writer, &checkpoint)
            .context("Failed to serialize checkpoint")?;

        fs::rename(&tmp_path, &self.checkpoint_path).with_context(|| {
            format!(
                "Failed to rename temp checkpoint: {:?}",
                self.checkpoint_path
            )
        })?;

        debug!(
            cursor = next_cursor,
            pages = stats.pages(),
            "Checkpoint saved"
        );

        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        clear(&self.output_dir, &self.prefix)
    }
}
