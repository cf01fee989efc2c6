use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_LINE_POSITION: f32 = 0.5;
pub const DEFAULT_TRACKING_DISTANCE: u32 = 80;
pub const DEFAULT_CROSSING_TOLERANCE: f32 = 5.0;
pub const DEFAULT_COOLDOWN_FRAMES: u64 = 30;
pub const DEFAULT_CLEANUP_INTERVAL: u64 = 100;

/// Counting engine tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Detections below this confidence are neither counted nor rendered.
    pub confidence_threshold: f32,
    /// Line position as a fraction of frame height, used when `line_y` is unset.
    pub line_position: f32,
    /// Fixed line row in pixels. Overrides `line_position`.
    pub line_y: Option<u32>,
    /// Width in pixels of a horizontal region bucket.
    pub tracking_distance: u32,
    /// Half-height in pixels of the band around the line (exclusive).
    pub crossing_tolerance: f32,
    /// Minimum frame gap between two counts of one crossing signature.
    pub cooldown_frames: u64,
    /// Cooldown entries are swept every this many processed frames.
    pub cleanup_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            line_position: DEFAULT_LINE_POSITION,
            line_y: None,
            tracking_distance: DEFAULT_TRACKING_DISTANCE,
            crossing_tolerance: DEFAULT_CROSSING_TOLERANCE,
            cooldown_frames: DEFAULT_COOLDOWN_FRAMES,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(EngineError::Configuration(format!(
                "confidence_threshold must be within 0..=1, got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.line_position) {
            return Err(EngineError::Configuration(format!(
                "line_position must be within 0..=1, got {}",
                self.line_position
            )));
        }
        if self.tracking_distance == 0 {
            return Err(EngineError::Configuration(
                "tracking_distance must be greater than zero".into(),
            ));
        }
        if !self.crossing_tolerance.is_finite() || self.crossing_tolerance < 0.0 {
            return Err(EngineError::Configuration(format!(
                "crossing_tolerance must be a non-negative number, got {}",
                self.crossing_tolerance
            )));
        }
        if self.cooldown_frames == 0 {
            return Err(EngineError::Configuration(
                "cooldown_frames must be greater than zero".into(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(EngineError::Configuration(
                "cleanup_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
