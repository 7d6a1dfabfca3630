use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    animation::DEFAULT_LEAD_MS,
    diagnostics::{DEFAULT_LOG_FILTER, DEFAULT_TRACE_FILE_PREFIX},
    engine::EngineOptions,
    export::{DEFAULT_EXPORT_FPS, ExportSettings, VideoCodec},
    model::{
        Color, DEFAULT_ARTBOARD_FILL, DEFAULT_ARTBOARD_HEIGHT, DEFAULT_ARTBOARD_WIDTH,
        DEFAULT_SAMPLE_RATE, DEFAULT_TIMELINE_DURATION_MS, Page,
    },
};

pub const CONFIG_FILE_NAME: &str = "adreel.config.toml";
pub const CONFIG_PATH_ENV: &str = "ADREEL_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub timeline: TimelineConfig,
    pub animation: AnimationConfig,
    pub audio: AudioConfig,
    pub export: ExportConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelineConfig {
    pub default_duration_ms: f64,
    pub artboard_width: u32,
    pub artboard_height: u32,
    pub artboard_fill: String,
    pub preview_tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnimationConfig {
    pub lead_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Directory relative media urls resolve against.
    pub asset_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub fps: u32,
    pub codec: VideoCodec,
    pub ffmpeg_binary: String,
    pub raster_scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub autosave_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: DEFAULT_TIMELINE_DURATION_MS,
            artboard_width: DEFAULT_ARTBOARD_WIDTH,
            artboard_height: DEFAULT_ARTBOARD_HEIGHT,
            artboard_fill: DEFAULT_ARTBOARD_FILL.to_string(),
            preview_tick_ms: 16,
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            lead_ms: DEFAULT_LEAD_MS,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            asset_root: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_EXPORT_FPS,
            codec: VideoCodec::default(),
            ffmpeg_binary: "ffmpeg".to_string(),
            raster_scale: 1.0,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: DEFAULT_TRACE_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            autosave_dir: PathBuf::from("data/autosave"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&content).with_context(|| {
            format!("failed to parse config TOML from {}", config_path.display())
        })?;

        debug!(path = %config_path.display(), "config loaded");
        Ok(config)
    }

    /// Missing config falls back to defaults; a present but broken file is
    /// still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(error) => {
                warn!(%error, "no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            lead_ms: self.animation.lead_ms,
            sample_rate: self.audio.sample_rate,
        }
    }

    #[must_use]
    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            fps: self.export.fps,
            codec: self.export.codec,
            sample_rate: self.audio.sample_rate,
        }
    }

    /// Empty page sized and filled from the `[timeline]` section.
    pub fn blank_page(&self) -> Result<Page> {
        let fill = Color::parse_hex(&self.timeline.artboard_fill)
            .map_err(anyhow::Error::msg)
            .context("invalid timeline.artboard_fill")?;
        Ok(Page::new(
            self.timeline.artboard_width.max(1),
            self.timeline.artboard_height.max(1),
            fill,
            self.timeline.default_duration_ms,
        ))
    }

    #[must_use]
    pub fn preview_period(&self) -> Duration {
        Duration::from_millis(self.timeline.preview_tick_ms.max(1))
    }

    #[must_use]
    pub fn ffmpeg_binary(&self) -> PathBuf {
        PathBuf::from(&self.export.ffmpeg_binary)
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
