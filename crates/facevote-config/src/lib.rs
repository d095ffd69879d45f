use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facevote/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facevote/config.toml";
pub const DEFAULT_DATABASE_PATH: &str = "/var/lib/facevote/facevote.db";
pub const DEFAULT_BLUR_THRESHOLD: f64 = 50.0;
pub const DEFAULT_JITTERS: u32 = 1;
pub const DEFAULT_EAR_THRESHOLD: f64 = 0.2;
pub const DEFAULT_MIN_INTER_EYE_RATIO: f64 = 0.03;
pub const DEFAULT_HEAD_MOVEMENT_PX: f64 = 10.0;
pub const DEFAULT_WINDOW_SECS: u64 = 5;
pub const DEFAULT_INTERVAL_MILLIS: u64 = 200;
pub const DEFAULT_K: usize = 3;
pub const DEFAULT_VOTER_CONFIDENCE: f64 = 0.6;
pub const DEFAULT_CANDIDATE_CONFIDENCE: f64 = 0.1;
pub const DEFAULT_FALLBACK_MAX_DISTANCE: f64 = 0.5;
pub const DEFAULT_REBUILD_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MILLIS: u64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessModeSetting {
    #[default]
    Blink,
    Geometry,
    HeadMovement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSetting {
    #[default]
    Euclidean,
    Manhattan,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LivenessSection {
    pub mode: Option<LivenessModeSetting>,
    pub ear_threshold: Option<f64>,
    pub min_inter_eye_ratio: Option<f64>,
    /// Sideways nose-tip shift in pixels for `head_movement` mode.
    pub head_movement_threshold: Option<f64>,
    pub window_secs: Option<u64>,
    pub frame_interval_millis: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CohortSection {
    pub k: Option<usize>,
    pub confidence_threshold: Option<f64>,
    /// Negative values disable the fallback scan.
    pub fallback_max_distance: Option<f64>,
    pub metric: Option<MetricSetting>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RebuildSection {
    pub max_attempts: Option<u32>,
    pub retry_delay_millis: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub database_path: Option<PathBuf>,
    pub index_dir: Option<PathBuf>,
    pub index_key_file: Option<PathBuf>,
    pub blur_threshold: Option<f64>,
    pub jitters: Option<u32>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub voters: CohortSection,
    #[serde(default)]
    pub candidates: CohortSection,
    #[serde(default)]
    pub rebuild: RebuildSection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLiveness {
    pub mode: LivenessModeSetting,
    pub ear_threshold: f64,
    pub min_inter_eye_ratio: f64,
    pub head_movement_threshold: f64,
    pub window: Duration,
    pub frame_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCohort {
    pub k: usize,
    pub confidence_threshold: f64,
    pub fallback_max_distance: Option<f64>,
    pub metric: MetricSetting,
}

impl ResolvedCohort {
    fn from_raw(raw: CohortSection, default_confidence: f64) -> Self {
        let fallback = raw
            .fallback_max_distance
            .unwrap_or(DEFAULT_FALLBACK_MAX_DISTANCE);
        Self {
            k: raw.k.unwrap_or(DEFAULT_K).max(1),
            confidence_threshold: unit_interval(
                raw.confidence_threshold.unwrap_or(default_confidence),
            ),
            fallback_max_distance: (fallback >= 0.0).then_some(fallback),
            metric: raw.metric.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRebuild {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub database_path: PathBuf,
    /// Explicit index directory; the index store falls back to the
    /// environment and then its default when unset.
    pub index_dir: Option<PathBuf>,
    pub index_key_file: Option<PathBuf>,
    pub blur_threshold: f64,
    pub jitters: u32,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub liveness: ResolvedLiveness,
    pub voters: ResolvedCohort,
    pub candidates: ResolvedCohort,
    pub rebuild: ResolvedRebuild,
}

fn unit_interval(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let liveness = raw.liveness;
        Self {
            database_path: raw
                .database_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            index_dir: raw.index_dir,
            index_key_file: raw.index_key_file,
            blur_threshold: raw.blur_threshold.unwrap_or(DEFAULT_BLUR_THRESHOLD).max(0.0),
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
            liveness: ResolvedLiveness {
                mode: liveness.mode.unwrap_or_default(),
                ear_threshold: unit_interval(
                    liveness.ear_threshold.unwrap_or(DEFAULT_EAR_THRESHOLD),
                ),
                min_inter_eye_ratio: unit_interval(
                    liveness
                        .min_inter_eye_ratio
                        .unwrap_or(DEFAULT_MIN_INTER_EYE_RATIO),
                ),
                head_movement_threshold: liveness
                    .head_movement_threshold
                    .unwrap_or(DEFAULT_HEAD_MOVEMENT_PX)
                    .max(0.0),
                window: Duration::from_secs(
                    liveness.window_secs.unwrap_or(DEFAULT_WINDOW_SECS).max(1),
                ),
                frame_interval: Duration::from_millis(
                    liveness
                        .frame_interval_millis
                        .unwrap_or(DEFAULT_INTERVAL_MILLIS),
                ),
            },
            voters: ResolvedCohort::from_raw(raw.voters, DEFAULT_VOTER_CONFIDENCE),
            candidates: ResolvedCohort::from_raw(raw.candidates, DEFAULT_CANDIDATE_CONFIDENCE),
            rebuild: ResolvedRebuild {
                max_attempts: raw
                    .rebuild
                    .max_attempts
                    .unwrap_or(DEFAULT_REBUILD_ATTEMPTS)
                    .max(1),
                retry_delay: Duration::from_millis(
                    raw.rebuild
                        .retry_delay_millis
                        .unwrap_or(DEFAULT_RETRY_DELAY_MILLIS),
                ),
            },
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_paths())
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => {
            let path = entry.source.clone();
            Ok(ResolvedConfigWithSource {
                resolved: ResolvedConfig::from_raw(entry.contents),
                source: Some(path),
            })
        }
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}
