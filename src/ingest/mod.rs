//! Detection frame sources.
//!
//! Sources stand in for the capture + inference loop: each call yields the
//! detections for one frame together with the frame height. Pixels never
//! reach this crate.
//!
//! - `replay`: JSON-lines file recorded from a detector
//! - `synthetic`: seeded conveyor simulation for demos and soak runs

pub mod replay;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::detect::Detection;

pub use replay::ReplaySource;
pub use synthetic::{SyntheticConfig, SyntheticConveyor};

/// Detections for one captured frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionFrame {
    pub height: u32,
    pub detections: Vec<Detection>,
}

pub trait FrameSource: Send {
    /// Source identifier used in logs.
    fn describe(&self) -> String;

    /// Next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>>;
}

/// Build a source from a locator: `synthetic://<seed>` or a replay file path.
pub fn open_source(
    locator: &str,
    frame_height: u32,
    frame_width: u32,
) -> Result<Box<dyn FrameSource>> {
    if let Some(seed) = locator.strip_prefix("synthetic://") {
        let seed = if seed.is_empty() {
            0
        } else {
            seed.parse()
                .map_err(|_| anyhow!("synthetic seed must be an integer, got '{}'", seed))?
        };
        return Ok(Box::new(SyntheticConveyor::new(SyntheticConfig {
            seed,
            frame_height,
            frame_width,
            ..SyntheticConfig::default()
        })));
    }
    let path = locator.strip_prefix("file://").unwrap_or(locator);
    Ok(Box::new(ReplaySource::open(Path::new(path), frame_height)?))
}
