use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SOURCE: &str = "stub://camera0";
const DEFAULT_FRAME_WIDTH: u32 = 500;
const DEFAULT_TARGET_FPS: u32 = 20;
const DEFAULT_CAMERA_TIMEOUT_MS: u64 = 1000;
const DEFAULT_BOUNDARY_Y: i32 = 360;
const DEFAULT_BOUNDARY_COLOR: [u8; 3] = [0, 0, 255];
const DEFAULT_MIN_AREA: u32 = 100;
const DEFAULT_THRESHOLD: u8 = 20;
const DEFAULT_BUFFER_SECS: u32 = 3;
const DEFAULT_OUTPUT_DIR: &str = "output/security_clips";
const DEFAULT_COMPRESSED_DIR: &str = "output/compressed_clips";
const DEFAULT_CONFIDENCE: f32 = 0.5;
/// Labels accepted when no allow-list is configured.
pub const DEFAULT_LABELS: [&str; 3] = ["Person", "Car", "Truck"];
const DEFAULT_MARKER_COLOR: [u8; 3] = [220, 20, 60];
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_SEARCH_MARGIN: u32 = 24;
const DEFAULT_MAX_MEAN_DIFF: f32 = 40.0;
const DEFAULT_FFMPEG: &str = "ffmpeg";

#[derive(Debug, Deserialize, Default)]
struct TripwireConfigFile {
    cameras: Option<CamerasConfigFile>,
    boundary: Option<BoundaryConfigFile>,
    motion: Option<MotionConfigFile>,
    buffer: Option<BufferConfigFile>,
    storage: Option<StorageConfigFile>,
    detection: Option<DetectionConfigFile>,
    tracker: Option<TrackerConfigFile>,
    compression: Option<CompressionConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    sources: Option<Vec<String>>,
    frame_width: Option<u32>,
    target_fps: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BoundaryConfigFile {
    row: Option<i32>,
    color: Option<[u8; 3]>,
    precedence: Option<CrossingPrecedence>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    min_area: Option<u32>,
    threshold: Option<u8>,
    gate: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct BufferConfigFile {
    seconds: Option<u32>,
    post_crossing_frames: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    output_dir: Option<PathBuf>,
    compressed_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    labels: Option<Vec<String>>,
    marker_color: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    search_margin: Option<u32>,
    max_mean_diff: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CompressionConfigFile {
    backend: Option<CompressionBackend>,
    ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    font_path: Option<PathBuf>,
}

/// Which positions feed the crossing evaluator within one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingPrecedence {
    /// Tracker box when the tracker produced one, detections otherwise.
    #[default]
    Authoritative,
    /// Every accepted detection, then the tracker box, all in order.
    Sequential,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionBackend {
    #[default]
    Ffmpeg,
    None,
}

/// Settings that may change while the pipeline runs.
///
/// The orchestrator swaps them in between ticks; workers never observe a
/// half-applied update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub boundary_y: i32,
    /// RGB colour of the boundary line on display frames.
    pub boundary_color: [u8; 3],
    pub confidence_threshold: f32,
    /// Legacy per-pixel difference threshold (motion gate only).
    pub motion_threshold: u8,
    /// Legacy changed-pixel count (motion gate only).
    pub min_area: u32,
    pub motion_gate: bool,
    pub precedence: CrossingPrecedence,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            boundary_y: DEFAULT_BOUNDARY_Y,
            boundary_color: DEFAULT_BOUNDARY_COLOR,
            confidence_threshold: DEFAULT_CONFIDENCE,
            motion_threshold: DEFAULT_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            motion_gate: false,
            precedence: CrossingPrecedence::Authoritative,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TripwireConfig {
    pub sources: Vec<String>,
    pub frame_width: u32,
    pub target_fps: u32,
    pub camera_timeout: Duration,
    pub buffer_seconds: u32,
    pub post_crossing_frames: Option<usize>,
    pub storage: StorageSettings,
    pub detection: DetectionSettings,
    pub tracker: TrackerSettings,
    pub compression: CompressionSettings,
    pub font_path: Option<PathBuf>,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    pub compressed_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// ONNX model; without one the marker backend is used.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub labels: Vec<String>,
    pub marker_color: [u8; 3],
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub search_margin: u32,
    pub max_mean_diff: f32,
}

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub backend: CompressionBackend,
    pub ffmpeg_path: PathBuf,
}

impl Default for TripwireConfig {
    fn default() -> Self {
        // Defaults never fail validation.
        Self::from_file(TripwireConfigFile::default())
    }
}

impl TripwireConfig {
    /// Load from `TRIPWIRE_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRIPWIRE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (JSON, or TOML by extension), then apply
    /// environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TripwireConfigFile) -> Self {
        let cameras = file.cameras.unwrap_or_default();
        let boundary = file.boundary.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let buffer = file.buffer.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let compression = file.compression.unwrap_or_default();

        let runtime = RuntimeSettings {
            boundary_y: boundary.row.unwrap_or(DEFAULT_BOUNDARY_Y),
            boundary_color: boundary.color.unwrap_or(DEFAULT_BOUNDARY_COLOR),
            confidence_threshold: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            motion_threshold: motion.threshold.unwrap_or(DEFAULT_THRESHOLD),
            min_area: motion.min_area.unwrap_or(DEFAULT_MIN_AREA),
            motion_gate: motion.gate.unwrap_or(false),
            precedence: boundary.precedence.unwrap_or_default(),
        };

        Self {
            sources: cameras
                .sources
                .unwrap_or_else(|| vec![DEFAULT_SOURCE.to_string()]),
            frame_width: cameras.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH),
            target_fps: cameras.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            camera_timeout: Duration::from_millis(
                cameras.timeout_ms.unwrap_or(DEFAULT_CAMERA_TIMEOUT_MS),
            ),
            buffer_seconds: buffer.seconds.unwrap_or(DEFAULT_BUFFER_SECS),
            post_crossing_frames: buffer.post_crossing_frames,
            storage: StorageSettings {
                output_dir: storage
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                compressed_dir: storage
                    .compressed_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPRESSED_DIR)),
            },
            detection: DetectionSettings {
                model_path: detection.model_path,
                input_size: detection.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
                labels: detection.labels.unwrap_or_else(|| {
                    DEFAULT_LABELS.iter().map(|label| label.to_string()).collect()
                }),
                marker_color: detection.marker_color.unwrap_or(DEFAULT_MARKER_COLOR),
            },
            tracker: TrackerSettings {
                search_margin: tracker.search_margin.unwrap_or(DEFAULT_SEARCH_MARGIN),
                max_mean_diff: tracker.max_mean_diff.unwrap_or(DEFAULT_MAX_MEAN_DIFF),
            },
            compression: CompressionSettings {
                backend: compression.backend.unwrap_or_default(),
                ffmpeg_path: compression
                    .ffmpeg_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
            },
            font_path: file.render.and_then(|render| render.font_path),
            runtime,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("TRIPWIRE_SOURCES") {
            let parsed = split_csv(&sources);
            if !parsed.is_empty() {
                self.sources = parsed;
            }
        }
        if let Ok(row) = std::env::var("TRIPWIRE_BOUNDARY_Y") {
            self.runtime.boundary_y = row
                .trim()
                .parse()
                .map_err(|_| anyhow!("TRIPWIRE_BOUNDARY_Y must be an integer pixel row"))?;
        }
        if let Ok(fps) = std::env::var("TRIPWIRE_FPS") {
            self.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("TRIPWIRE_FPS must be an integer frame rate"))?;
        }
        if let Ok(dir) = std::env::var("TRIPWIRE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.storage.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("TRIPWIRE_COMPRESSED_DIR") {
            if !dir.trim().is_empty() {
                self.storage.compressed_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("TRIPWIRE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.sources.retain(|source| !source.trim().is_empty());
        if self.sources.is_empty() {
            return Err(anyhow!("at least one camera source is required"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.buffer_seconds == 0 {
            return Err(anyhow!("buffer seconds must be greater than zero"));
        }
        if self.camera_timeout.is_zero() {
            return Err(anyhow!("camera timeout must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.runtime.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within 0..=1"));
        }
        if self.runtime.boundary_y < 0 {
            return Err(anyhow!("boundary row must be non-negative"));
        }
        if self.detection.labels.is_empty() {
            return Err(anyhow!("detection label allow-list must not be empty"));
        }
        Ok(())
    }

    /// Pre-event buffer length in frames (fps x window seconds).
    pub fn buffer_capacity(&self) -> usize {
        self.target_fps as usize * self.buffer_seconds as usize
    }

    /// Live frames recorded after the crossing; defaults to the buffer length.
    pub fn post_crossing_limit(&self) -> usize {
        self.post_crossing_frames
            .unwrap_or_else(|| self.buffer_capacity())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps as f64)
    }
}

fn read_config_file(path: &Path) -> Result<TripwireConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
