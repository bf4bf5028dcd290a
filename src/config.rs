//! Run configuration.
//!
//! Layers, lowest to highest precedence:
//! 1. settings file (TOML)
//! 2. `BATCH_DETECT_*` environment variables
//! 3. inline `key=value` overrides (`--set`)
//!
//! The resolved `RunConfig` is immutable after `load`. The detector model config
//! (`DetectorConfig`, JSON) is derived from it once via `RunConfig::detector_config`.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::output::VideoWriterKind;

pub const DEFAULT_SETTINGS_FILE: &str = "settings.toml";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_VIDEO_EXT: &str = ".mp4";

const ENV_CONFIG: &str = "BATCH_DETECT_CONFIG";
const ENV_DATASET: &str = "BATCH_DETECT_DATASET";
const ENV_DETECTOR: &str = "BATCH_DETECT_DETECTOR";
const ENV_CONFIDENCE: &str = "BATCH_DETECT_CONFIDENCE";
const ENV_PARALLEL: &str = "BATCH_DETECT_PARALLEL";
const ENV_GENERATE_VIDEOS: &str = "BATCH_DETECT_GENERATE_VIDEOS";
const ENV_WRITER: &str = "BATCH_DETECT_WRITER";

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    active: Option<ActiveSection>,
    #[serde(default)]
    datasets: HashMap<String, DatasetSection>,
    #[serde(default)]
    detectors: HashMap<String, DetectorSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ActiveSection {
    dataset: Option<String>,
    detector: Option<String>,
    video: Option<VideoSection>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoSection {
    writer: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DatasetSection {
    path: Option<PathBuf>,
    ext: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorSection {
    dir: Option<PathBuf>,
    config: Option<PathBuf>,
    checkpoint: Option<PathBuf>,
    confidence: Option<f32>,
    parallel: Option<bool>,
    workers: Option<usize>,
    generate_videos: Option<bool>,
    pred_all_class: Option<bool>,
}

/// Frozen configuration for one batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root: PathBuf,
    pub dataset: String,
    pub detector: String,
    pub video_in_dir: PathBuf,
    pub video_ext: String,
    pub json_out_dir: PathBuf,
    pub video_out_dir: PathBuf,
    pub detector_config: PathBuf,
    pub checkpoint: PathBuf,
    pub confidence: f32,
    pub parallel: bool,
    /// Worker count for parallel inference; 0 picks the available parallelism.
    pub workers: usize,
    pub generate_videos: bool,
    pub pred_all_class: bool,
    pub writer: VideoWriterKind,
}

/// Values that overrides may touch before paths are derived.
#[derive(Debug, Default)]
struct Layered {
    dataset: Option<String>,
    detector: Option<String>,
    confidence: Option<f32>,
    parallel: Option<bool>,
    workers: Option<usize>,
    generate_videos: Option<bool>,
    pred_all_class: Option<bool>,
    writer: Option<String>,
    ext: Option<String>,
}

impl RunConfig {
    /// Resolve the run configuration and check its preconditions.
    ///
    /// `settings_path` falls back to `BATCH_DETECT_CONFIG`, then to
    /// `<root>/settings.toml`.
    pub fn load(settings_path: Option<&Path>, root: &Path, overrides: &[String]) -> Result<Self> {
        let path = match settings_path {
            Some(path) => path.to_path_buf(),
            None => match env_value(ENV_CONFIG) {
                Some(path) => PathBuf::from(path),
                None => root.join(DEFAULT_SETTINGS_FILE),
            },
        };
        let file = read_settings_file(&path)?;

        let mut layered = Layered::default();
        layered.apply_env()?;
        layered.apply_overrides(overrides)?;

        let cfg = Self::resolve(file, root, layered)?;
        cfg.validate()?;
        cfg.check_inputs()?;
        Ok(cfg)
    }

    fn resolve(file: SettingsFile, root: &Path, layered: Layered) -> Result<Self> {
        let active = file.active.unwrap_or_default();
        let dataset = layered
            .dataset
            .or(active.dataset)
            .ok_or_else(|| anyhow!("no active dataset configured"))?;
        let detector = layered
            .detector
            .or(active.detector)
            .ok_or_else(|| anyhow!("no active detector configured"))?;

        let dataset_section = file
            .datasets
            .get(&dataset)
            .ok_or_else(|| anyhow!("dataset '{}' is not defined in settings", dataset))?;
        let detector_section = file
            .detectors
            .get(&detector)
            .ok_or_else(|| anyhow!("detector '{}' is not defined in settings", detector))?;

        let video_in_dir = root.join(
            dataset_section
                .path
                .clone()
                .ok_or_else(|| anyhow!("dataset '{}' has no path", dataset))?,
        );
        let video_ext = layered
            .ext
            .or_else(|| dataset_section.ext.clone())
            .unwrap_or_else(|| DEFAULT_VIDEO_EXT.to_string());

        let detector_dir = root.join(detector_section.dir.clone().unwrap_or_default());
        let detector_config = detector_dir.join(
            detector_section
                .config
                .clone()
                .ok_or_else(|| anyhow!("detector '{}' has no config", detector))?,
        );
        let checkpoint = detector_dir.join(
            detector_section
                .checkpoint
                .clone()
                .ok_or_else(|| anyhow!("detector '{}' has no checkpoint", detector))?,
        );

        let writer = match layered
            .writer
            .or_else(|| active.video.and_then(|video| video.writer))
        {
            Some(name) => name.parse()?,
            None => VideoWriterKind::default(),
        };

        let detect_root = root.join("data").join(&dataset).join(&detector).join("detect");

        Ok(Self {
            root: root.to_path_buf(),
            video_in_dir,
            video_ext,
            json_out_dir: detect_root.join("json"),
            video_out_dir: detect_root.join("videos"),
            detector_config,
            checkpoint,
            confidence: layered
                .confidence
                .or(detector_section.confidence)
                .unwrap_or(DEFAULT_CONFIDENCE),
            parallel: layered
                .parallel
                .or(detector_section.parallel)
                .unwrap_or(false),
            workers: layered.workers.or(detector_section.workers).unwrap_or(0),
            generate_videos: layered
                .generate_videos
                .or(detector_section.generate_videos)
                .unwrap_or(false),
            pred_all_class: layered
                .pred_all_class
                .or(detector_section.pred_all_class)
                .unwrap_or(false),
            writer,
            dataset,
            detector,
        })
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            bail!("confidence must be within 0..=1, got {}", self.confidence);
        }
        if self.video_ext.trim().is_empty() {
            bail!("video extension must not be empty");
        }
        if cfg!(not(feature = "video-ffmpeg"))
            && self.generate_videos
            && self.writer == VideoWriterKind::Libav
        {
            bail!("the libav video writer requires the video-ffmpeg feature");
        }
        Ok(())
    }

    /// Fail-fast checks on the inputs the run depends on.
    pub fn check_inputs(&self) -> Result<()> {
        ensure_readable_dir(&self.video_in_dir).context("video input directory")?;
        ensure_readable_file(&self.detector_config).context("detector config")?;
        ensure_readable_file(&self.checkpoint).context("detector checkpoint")?;
        Ok(())
    }

    /// Build the frozen detector config: file, then `weights <checkpoint>`,
    /// then the run's threshold and class policy.
    pub fn detector_config(&self) -> Result<DetectorConfig> {
        let mut cfg = DetectorConfig::from_file(&self.detector_config)?;
        cfg.merge_from_list(&[
            "weights".to_string(),
            self.checkpoint.display().to_string(),
        ])?;
        cfg.score_threshold = self.confidence;
        cfg.one_class_per_proposal = !self.pred_all_class;
        Ok(cfg)
    }
}

impl Layered {
    fn apply_env(&mut self) -> Result<()> {
        if let Some(dataset) = env_value(ENV_DATASET) {
            self.dataset = Some(dataset);
        }
        if let Some(detector) = env_value(ENV_DETECTOR) {
            self.detector = Some(detector);
        }
        if let Some(confidence) = env_value(ENV_CONFIDENCE) {
            self.confidence = Some(
                confidence
                    .parse()
                    .map_err(|_| anyhow!("{} must be a number", ENV_CONFIDENCE))?,
            );
        }
        if let Some(parallel) = env_value(ENV_PARALLEL) {
            self.parallel = Some(parse_bool(ENV_PARALLEL, &parallel)?);
        }
        if let Some(generate) = env_value(ENV_GENERATE_VIDEOS) {
            self.generate_videos = Some(parse_bool(ENV_GENERATE_VIDEOS, &generate)?);
        }
        if let Some(writer) = env_value(ENV_WRITER) {
            self.writer = Some(writer);
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for entry in overrides {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("override '{}' must look like key=value", entry))?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "dataset" => self.dataset = Some(value.to_string()),
                "detector" => self.detector = Some(value.to_string()),
                "confidence" => {
                    self.confidence = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("confidence must be a number"))?,
                    )
                }
                "parallel" => self.parallel = Some(parse_bool(key, value)?),
                "workers" => {
                    self.workers = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("workers must be a non-negative integer"))?,
                    )
                }
                "generate_videos" => self.generate_videos = Some(parse_bool(key, value)?),
                "pred_all_class" => self.pred_all_class = Some(parse_bool(key, value)?),
                "writer" => self.writer = Some(value.to_string()),
                "ext" => self.ext = Some(value.to_string()),
                other => bail!("unknown override key '{}'", other),
            }
        }
        Ok(())
    }
}

/// Detector model configuration, loaded from JSON and frozen before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub backend: String,
    pub input_width: u32,
    pub input_height: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub one_class_per_proposal: bool,
    pub max_detections: usize,
    pub weights: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "stub".to_string(),
            input_width: 640,
            input_height: 640,
            score_threshold: DEFAULT_CONFIDENCE,
            nms_threshold: 0.5,
            one_class_per_proposal: true,
            max_detections: 100,
            weights: None,
        }
    }
}

impl DetectorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read detector config {}: {}", path.display(), e))?;
        let cfg = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detector config {}: {}", path.display(), e))?;
        Ok(cfg)
    }

    /// Apply `[key, value, key, value, ...]` overrides.
    pub fn merge_from_list(&mut self, opts: &[String]) -> Result<()> {
        if opts.len() % 2 != 0 {
            bail!("override list must contain key/value pairs");
        }
        for pair in opts.chunks_exact(2) {
            let (key, value) = (pair[0].as_str(), pair[1].as_str());
            match key {
                "backend" => self.backend = value.to_string(),
                "input_width" => self.input_width = parse_num(key, value)?,
                "input_height" => self.input_height = parse_num(key, value)?,
                "score_threshold" => self.score_threshold = parse_num(key, value)?,
                "nms_threshold" => self.nms_threshold = parse_num(key, value)?,
                "one_class_per_proposal" => self.one_class_per_proposal = parse_bool(key, value)?,
                "max_detections" => self.max_detections = parse_num(key, value)?,
                "weights" => self.weights = Some(PathBuf::from(value)),
                other => bail!("unknown detector config key '{}'", other),
            }
        }
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<SettingsFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read settings file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid settings file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn ensure_readable_dir(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| anyhow!("{} is not accessible: {}", path.display(), e))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    std::fs::read_dir(path).map_err(|e| anyhow!("{} is not readable: {}", path.display(), e))?;
    Ok(())
}

fn ensure_readable_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| anyhow!("{} is not accessible: {}", path.display(), e))?;
    if !meta.is_file() {
        bail!("{} is not a file", path.display());
    }
    std::fs::File::open(path).map_err(|e| anyhow!("{} is not readable: {}", path.display(), e))?;
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got '{}'", key, value)),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value))
}
