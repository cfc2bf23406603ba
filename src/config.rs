use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::yolo::{DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD};
use crate::detect::RemapMode;
use crate::error::JobError;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_FRAME_SKIP: u32 = 1;
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_ARTIFACT_MAX_AGE_SECS: u64 = 2 * 60 * 60;

/// Per-job detection parameters. Immutable while a job runs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Run inference on every Nth frame.
    pub frame_skip: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            frame_skip: DEFAULT_FRAME_SKIP,
        }
    }
}

impl DetectionConfig {
    pub fn new(confidence_threshold: f32, frame_skip: u32) -> Self {
        Self {
            confidence_threshold,
            frame_skip,
        }
    }

    /// Reject out-of-range values instead of clamping them.
    pub fn validate(&self) -> Result<(), JobError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(JobError::invalid_config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.frame_skip == 0 {
            return Err(JobError::invalid_config("frame_skip must be at least 1"));
        }
        Ok(())
    }

    /// Whether frame `index` goes through inference.
    pub fn is_processed(&self, index: u64) -> bool {
        index % u64::from(self.frame_skip.max(1)) == 0
    }
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    artifacts: Option<ArtifactConfigFile>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
    class_remap: Option<RemapMode>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    frame_skip: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ArtifactConfigFile {
    upload_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    max_age_secs: Option<u64>,
}

/// Everything needed to load a detector.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub input_size: u32,
    pub iou_threshold: f32,
    /// Overrides the names embedded in the model.
    pub class_names: Option<Vec<String>>,
    pub class_remap: RemapMode,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            class_names: None,
            class_remap: RemapMode::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model: ModelSettings,
    pub detection: DetectionConfig,
    pub artifacts: ArtifactSettings,
    /// Overrides the bundled label font.
    pub font_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DRIVEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let defaults = ModelSettings::default();
        let model = match file.model {
            Some(model) => ModelSettings {
                path: model.path.unwrap_or(defaults.path),
                input_size: model.input_size.unwrap_or(defaults.input_size),
                iou_threshold: model.iou_threshold.unwrap_or(defaults.iou_threshold),
                class_names: model.class_names,
                class_remap: model.class_remap.unwrap_or(defaults.class_remap),
            },
            None => defaults,
        };
        let detection = DetectionConfig {
            confidence_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.confidence)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            frame_skip: file
                .detection
                .as_ref()
                .and_then(|d| d.frame_skip)
                .unwrap_or(DEFAULT_FRAME_SKIP),
        };
        let artifacts = ArtifactSettings {
            upload_dir: file
                .artifacts
                .as_ref()
                .and_then(|a| a.upload_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            output_dir: file
                .artifacts
                .as_ref()
                .and_then(|a| a.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            max_age: Duration::from_secs(
                file.artifacts
                    .and_then(|a| a.max_age_secs)
                    .unwrap_or(DEFAULT_ARTIFACT_MAX_AGE_SECS),
            ),
        };
        Self {
            model,
            detection,
            artifacts,
            font_path: file.font_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("DRIVEWATCH_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(names) = non_empty_env("DRIVEWATCH_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.model.class_names = Some(parsed);
            }
        }
        if let Some(mode) = non_empty_env("DRIVEWATCH_CLASS_REMAP") {
            self.model.class_remap = mode.parse()?;
        }
        if let Some(path) = non_empty_env("DRIVEWATCH_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty_env("DRIVEWATCH_UPLOAD_DIR") {
            self.artifacts.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("DRIVEWATCH_OUTPUT_DIR") {
            self.artifacts.output_dir = PathBuf::from(dir);
        }
        if let Some(age) = non_empty_env("DRIVEWATCH_ARTIFACT_MAX_AGE_SECS") {
            let seconds: u64 = age.trim().parse().map_err(|_| {
                anyhow!("DRIVEWATCH_ARTIFACT_MAX_AGE_SECS must be an integer number of seconds")
            })?;
            self.artifacts.max_age = Duration::from_secs(seconds);
        }
        if let Some(confidence) = non_empty_env("DRIVEWATCH_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("DRIVEWATCH_CONFIDENCE must be a number"))?;
        }
        if let Some(skip) = non_empty_env("DRIVEWATCH_FRAME_SKIP") {
            self.detection.frame_skip = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("DRIVEWATCH_FRAME_SKIP must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input_size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if !(0.0..=1.0).contains(&self.model.iou_threshold) {
            return Err(anyhow!("model iou_threshold must be within [0, 1]"));
        }
        if let Some(names) = &self.model.class_names {
            if names.is_empty() || names.iter().any(|n| n.trim().is_empty()) {
                return Err(anyhow!("class_names must be a non-empty list of names"));
            }
        }
        if self.artifacts.max_age.as_secs() == 0 {
            return Err(anyhow!("artifact max age must be greater than zero"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
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
