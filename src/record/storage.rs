use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

use crate::config::StorageSettings;
use crate::error::PipelineError;

/// Clip name prefix; the second-resolution start time follows.
pub const CLIP_PREFIX: &str = "crossing_";
pub const RAW_EXTENSION: &str = "y4m";

const MAX_SUFFIX: u32 = 1000;

/// The two clip directories.
#[derive(Clone, Debug)]
pub struct Storage {
    raw_dir: PathBuf,
    compressed_dir: PathBuf,
}

impl Storage {
    /// Create both roots if they do not exist yet.
    pub fn new(raw_dir: impl Into<PathBuf>, compressed_dir: impl Into<PathBuf>) -> Result<Self> {
        let raw_dir = raw_dir.into();
        let compressed_dir = compressed_dir.into();
        for dir in [&raw_dir, &compressed_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::SinkWriteFailure {
                path: dir.to_path_buf(),
                reason: format!("cannot create directory: {e}"),
            })?;
        }
        Ok(Self {
            raw_dir,
            compressed_dir,
        })
    }

    pub fn from_settings(settings: &StorageSettings) -> Result<Self> {
        Self::new(&settings.output_dir, &settings.compressed_dir)
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn compressed_dir(&self) -> &Path {
        &self.compressed_dir
    }

    /// Create a fresh raw clip file for a session started at `started`.
    ///
    /// Names have second resolution, so two sessions in the same second get
    /// `crossing_<ts>.y4m`, `crossing_<ts>_1.y4m`, ... The file is opened with
    /// `create_new`; an existing clip is never truncated.
    pub fn reserve_clip(&self, started: &DateTime<Local>) -> Result<(PathBuf, File)> {
        let stem = clip_stem(started);
        for n in 0..MAX_SUFFIX {
            let name = if n == 0 {
                format!("{stem}.{RAW_EXTENSION}")
            } else {
                format!("{stem}_{n}.{RAW_EXTENSION}")
            };
            let path = self.raw_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(PipelineError::SinkWriteFailure {
                        path,
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
        Err(anyhow!(
            "no free clip name for {} in {}",
            stem,
            self.raw_dir.display()
        ))
    }

    /// Compressed output for a raw clip: same stem, `extension`, compressed root.
    pub fn compressed_path_for(&self, raw: &Path, extension: &str) -> PathBuf {
        let stem = raw
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| CLIP_PREFIX.trim_end_matches('_').to_string());
        self.compressed_dir.join(format!("{stem}.{extension}"))
    }
}

/// `crossing_<YYYYMMDD_HHMMSS>` in local time.
pub fn clip_stem(started: &DateTime<Local>) -> String {
    format!("{CLIP_PREFIX}{}", started.format("%Y%m%d_%H%M%S"))
}

/// Manifest sits next to the raw clip.
pub fn manifest_path_for(raw: &Path) -> PathBuf {
    raw.with_extension("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn creates_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("raw/a"), dir.path().join("mp4")).unwrap();
        assert!(storage.raw_dir().is_dir());
        assert!(storage.compressed_dir().is_dir());
    }

    #[test]
    fn same_second_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("raw"), dir.path().join("mp4")).unwrap();

        let (first, _) = storage.reserve_clip(&noon()).unwrap();
        let (second, _) = storage.reserve_clip(&noon()).unwrap();
        let (third, _) = storage.reserve_clip(&noon()).unwrap();

        assert_eq!(first.file_name().unwrap(), "crossing_20250101_120000.y4m");
        assert_eq!(second.file_name().unwrap(), "crossing_20250101_120000_1.y4m");
        assert_eq!(third.file_name().unwrap(), "crossing_20250101_120000_2.y4m");
    }

    #[test]
    fn derived_paths_keep_the_stem() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("raw"), dir.path().join("mp4")).unwrap();
        let raw = storage.raw_dir().join("crossing_20250101_120000_1.y4m");
        assert_eq!(
            storage.compressed_path_for(&raw, "mp4"),
            dir.path().join("mp4/crossing_20250101_120000_1.mp4")
        );
        assert_eq!(
            manifest_path_for(&raw),
            storage.raw_dir().join("crossing_20250101_120000_1.json")
        );
    }
}
