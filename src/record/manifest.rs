use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::recorder::ClipSummary;
use crate::record::storage::manifest_path_for;

/// JSON sidecar describing a finished raw clip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipManifest {
    pub camera: String,
    pub clip: String,
    pub started_at: String,
    pub pre_event_frames: usize,
    pub live_frames: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub finalized_early: bool,
    /// Hex SHA-256 of the raw clip bytes.
    pub sha256: String,
}

impl ClipManifest {
    /// Build a manifest for `summary`, hashing the clip on disk.
    pub fn for_clip(summary: &ClipSummary) -> Result<Self> {
        Ok(Self {
            camera: summary.camera.clone(),
            clip: summary
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            started_at: summary.started_at.to_rfc3339(),
            pre_event_frames: summary.pre_event_frames,
            live_frames: summary.live_frames,
            first_sequence: summary.first_sequence,
            last_sequence: summary.last_sequence,
            finalized_early: summary.finalized_early,
            sha256: sha256_file(&summary.path)?,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write manifest {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Hash the clip and write its manifest beside it.
pub fn write_manifest(summary: &ClipSummary) -> Result<PathBuf> {
    let path = manifest_path_for(&summary.path);
    ClipManifest::for_clip(summary)?.write(&path)?;
    Ok(path)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
