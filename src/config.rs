use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineConfig;

const DEFAULT_DB_PATH: &str = "counts.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SOURCE: &str = "synthetic://0";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_DISPLAY_DEVICE: &str = "/dev/ttyUSB0";
const DEFAULT_DISPLAY_INTERVAL_MS: u64 = 1000;
const DEFAULT_DASHBOARD_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    source: Option<SourceConfigFile>,
    counting: Option<CountingConfigFile>,
    display: Option<DisplayConfigFile>,
    dashboard: Option<DashboardConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    locator: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CountingConfigFile {
    confidence_threshold: Option<f32>,
    line_position: Option<f32>,
    line_y: Option<u32>,
    tracking_distance: Option<u32>,
    crossing_tolerance: Option<f32>,
    cooldown_frames: Option<u64>,
    cleanup_interval: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    enabled: Option<bool>,
    device: Option<PathBuf>,
    send_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub db_path: String,
    pub api_addr: String,
    pub source: SourceSettings,
    pub engine: EngineConfig,
    pub display: DisplaySettings,
    pub dashboard: Option<DashboardSettings>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `synthetic://<seed>` or a replay file path.
    pub locator: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub enabled: bool,
    pub device: PathBuf,
    pub send_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub url: String,
    pub timeout: Duration,
}

impl CounterConfig {
    /// File named by `COUNTER_CONFIG` (TOML), then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`CounterConfig::load`] with an explicit file instead of `COUNTER_CONFIG`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let source = file.source.unwrap_or_default();
        let source = SourceSettings {
            locator: source.locator.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: source.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: source.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let counting = file.counting.unwrap_or_default();
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            confidence_threshold: counting
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            line_position: counting.line_position.unwrap_or(defaults.line_position),
            line_y: counting.line_y.or(defaults.line_y),
            tracking_distance: counting
                .tracking_distance
                .unwrap_or(defaults.tracking_distance),
            crossing_tolerance: counting
                .crossing_tolerance
                .unwrap_or(defaults.crossing_tolerance),
            cooldown_frames: counting.cooldown_frames.unwrap_or(defaults.cooldown_frames),
            cleanup_interval: counting
                .cleanup_interval
                .unwrap_or(defaults.cleanup_interval),
        };

        let display = file.display.unwrap_or_default();
        let display = DisplaySettings {
            enabled: display.enabled.unwrap_or(false),
            device: display
                .device
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DISPLAY_DEVICE)),
            send_interval: Duration::from_millis(
                display
                    .send_interval_ms
                    .unwrap_or(DEFAULT_DISPLAY_INTERVAL_MS),
            ),
        };

        let dashboard = file.dashboard.and_then(|dashboard| {
            dashboard.url.map(|url| DashboardSettings {
                url,
                timeout: Duration::from_secs(
                    dashboard
                        .timeout_secs
                        .unwrap_or(DEFAULT_DASHBOARD_TIMEOUT_SECS),
                ),
            })
        });

        Self {
            db_path,
            api_addr,
            source,
            engine,
            display,
            dashboard,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("COUNTER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("COUNTER_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(locator) = std::env::var("COUNTER_SOURCE") {
            if !locator.trim().is_empty() {
                self.source.locator = locator;
            }
        }
        if let Ok(device) = std::env::var("COUNTER_DISPLAY_DEVICE") {
            if !device.trim().is_empty() {
                self.display.device = PathBuf::from(device);
                self.display.enabled = true;
            }
        }
        if let Ok(url) = std::env::var("COUNTER_DASHBOARD_URL") {
            if !url.trim().is_empty() {
                let timeout = self
                    .dashboard
                    .as_ref()
                    .map(|d| d.timeout)
                    .unwrap_or(Duration::from_secs(DEFAULT_DASHBOARD_TIMEOUT_SECS));
                self.dashboard = Some(DashboardSettings { url, timeout });
            }
        }
        if let Ok(threshold) = std::env::var("COUNTER_CONFIDENCE_THRESHOLD") {
            self.engine.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("COUNTER_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.engine.validate()?;
        if self.source.height == 0 || self.source.width == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if let Some(dashboard) = &mut self.dashboard {
            dashboard.url = dashboard.url.trim_end_matches('/').to_string();
            if !dashboard.url.starts_with("http://") && !dashboard.url.starts_with("https://") {
                return Err(anyhow!(
                    "dashboard url must start with http:// or https://, got '{}'",
                    dashboard.url
                ));
            }
        }
        Ok(())
    }

    /// Interval between frames at the configured target rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.source.target_fps as f64)
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
