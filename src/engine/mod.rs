//! Line-crossing counting engine.
//!
//! The engine counts each bunch once as its center enters a narrow band
//! around a horizontal line. It relies on a fixed camera and a single line
//! instead of a tracker, using two checks per detection:
//!
//! 1. Was this `ObjectKey` absent from the previous frame? Keys are swapped
//!    wholesale every processed frame, never accumulated.
//! 2. Is its `CrossingSignature` outside its cooldown window?
//!
//! An object that oscillates across a region bucket boundary can be missed
//! or counted twice. That approximation is accepted in exchange for a cost
//! linear in the number of detections per frame.
//!
//! The engine performs no I/O and is not reentrant. Hosts that share it
//! across threads wrap it (see [`crate::session::SharedSession`]).

mod config;
mod keys;
mod state;

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::detect::{BoundingBox, BunchClass, Detection};
use crate::error::EngineError;

pub use config::{
    EngineConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_COOLDOWN_FRAMES,
    DEFAULT_CROSSING_TOLERANCE, DEFAULT_LINE_POSITION, DEFAULT_TRACKING_DISTANCE,
};
pub use keys::{region_x, CrossingSignature, ObjectKey};
pub use state::EngineState;

/// Session totals. Never decrease between `start` and `stop`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub suitable: u64,
    pub unsuitable: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.suitable + self.unsuitable
    }

    pub fn get(&self, class: BunchClass) -> u64 {
        match class {
            BunchClass::Suitable => self.suitable,
            BunchClass::Unsuitable => self.unsuitable,
        }
    }

    fn increment(&mut self, class: BunchClass) -> u64 {
        let slot = match class {
            BunchClass::Suitable => &mut self.suitable,
            BunchClass::Unsuitable => &mut self.unsuitable,
        };
        *slot += 1;
        *slot
    }
}

/// Emitted once per counted crossing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CountDelta {
    pub class: BunchClass,
    pub new_total: u64,
    pub frame_number: u64,
    /// Confidence of the detection that crossed.
    pub confidence: f32,
}

/// A detection that passed validation and the confidence threshold, ready for overlay rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedDetection {
    pub bbox: BoundingBox,
    pub class_id: i64,
    pub confidence: f32,
    pub center: (f32, f32),
    /// True when this detection produced a count on this frame.
    pub counted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectedDetection {
    /// Position of the detection in the frame's input.
    pub index: usize,
    pub error: EngineError,
}

/// Outcome of one `process_frame` call.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineResult {
    /// False when the engine was not running and the frame was ignored.
    pub processed: bool,
    pub frame_number: u64,
    pub annotated: Vec<AnnotatedDetection>,
    pub suitable_count: u64,
    pub unsuitable_count: u64,
    pub line_y: Option<i64>,
    pub count_deltas: Vec<CountDelta>,
    pub rejected: Vec<RejectedDetection>,
}

impl EngineResult {
    /// Most recent delta of the frame, if any crossing was counted.
    pub fn count_delta(&self) -> Option<&CountDelta> {
        self.count_deltas.last()
    }
}

/// Totals at the moment a session was stopped, before the reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    pub suitable_count: u64,
    pub unsuitable_count: u64,
    pub frames_processed: u64,
}

/// Read-only view published to status consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountSnapshot {
    pub suitable_count: u64,
    pub unsuitable_count: u64,
    pub total_count: u64,
    pub status: &'static str,
    pub frame_count: u64,
    pub line_y: Option<i64>,
}

pub struct CountingEngine {
    config: EngineConfig,
    state: EngineState,
    line_y: Option<i64>,
    previous_objects: HashSet<ObjectKey>,
    recently_counted: HashMap<CrossingSignature, u64>,
    frame_count: u64,
    counters: Counters,
}

impl CountingEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            state: EngineState::Idle,
            line_y: None,
            previous_objects: HashSet::new(),
            recently_counted: HashMap::new(),
            frame_count: 0,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Line row pinned for the current session, once known.
    pub fn line_y(&self) -> Option<i64> {
        self.line_y
    }

    /// Number of signatures currently held for cooldown bookkeeping.
    pub fn cooldown_entries(&self) -> usize {
        self.recently_counted.len()
    }

    /// Number of object keys seen on the last processed frame.
    pub fn previous_object_count(&self) -> usize {
        self.previous_objects.len()
    }

    /// Begin a session. From `Stopped` this passes through `Idle`, clearing all state.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let next = self.state.start()?;
        self.clear();
        self.state = next;
        self.line_y = self.config.line_y.map(i64::from);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.state = self.state.pause()?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.state = self.state.resume()?;
        Ok(())
    }

    /// End the session. Totals are returned, then counters and tracking state are cleared.
    pub fn stop(&mut self) -> Result<StopSummary, EngineError> {
        self.state = self.state.stop()?;
        let summary = StopSummary {
            suitable_count: self.counters.suitable,
            unsuitable_count: self.counters.unsuitable,
            frames_processed: self.frame_count,
        };
        self.clear();
        Ok(summary)
    }

    /// `Stopped -> Idle`.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.state = self.state.reset()?;
        self.clear();
        Ok(())
    }

    pub fn snapshot(&self) -> CountSnapshot {
        let status = match self.state {
            EngineState::Running if self.line_y.is_none() => "loading",
            other => other.as_str(),
        };
        CountSnapshot {
            suitable_count: self.counters.suitable,
            unsuitable_count: self.counters.unsuitable,
            total_count: self.counters.total(),
            status,
            frame_count: self.frame_count,
            line_y: self.line_y,
        }
    }

    /// Process one frame of detections.
    ///
    /// Frames submitted while not running are ignored entirely: no counter,
    /// key set or frame number changes.
    pub fn process_frame(&mut self, detections: &[Detection], frame_height: u32) -> EngineResult {
        if self.state != EngineState::Running {
            return self.unprocessed();
        }

        self.frame_count += 1;
        let line_y = self.pin_line(frame_height);

        let mut current_objects = HashSet::with_capacity(detections.len());
        let mut annotated = Vec::with_capacity(detections.len());
        let mut count_deltas = Vec::new();
        let mut rejected = Vec::new();

        for (index, det) in detections.iter().enumerate() {
            if let Err(error) = validate_detection(det) {
                log::debug!("frame {}: rejected detection {}: {}", self.frame_count, index, error);
                rejected.push(RejectedDetection { index, error });
                continue;
            }
            if det.confidence < self.config.confidence_threshold {
                continue;
            }

            let (center_x, center_y) = det.bbox.center();
            let region = region_x(center_x, self.config.tracking_distance);
            let key = ObjectKey::new(det.class_id, region, center_y);
            current_objects.insert(key);

            let mut counted = false;
            if !self.previous_objects.contains(&key) && self.within_band(center_y, line_y) {
                if let Some(class) = det.class() {
                    let signature = CrossingSignature {
                        class,
                        region_x: region,
                        line_y,
                    };
                    if !self.cooling_down(&signature) {
                        let new_total = self.counters.increment(class);
                        self.recently_counted.insert(signature, self.frame_count);
                        log::info!(
                            "counted {} bunch at region_x={} frame={} total={}",
                            class.label().to_lowercase(),
                            region,
                            self.frame_count,
                            new_total
                        );
                        count_deltas.push(CountDelta {
                            class,
                            new_total,
                            frame_number: self.frame_count,
                            confidence: det.confidence,
                        });
                        counted = true;
                    }
                }
            }

            annotated.push(AnnotatedDetection {
                bbox: det.bbox,
                class_id: det.class_id,
                confidence: det.confidence,
                center: (center_x, center_y),
                counted,
            });
        }

        self.previous_objects = current_objects;

        if self.frame_count % self.config.cleanup_interval == 0 {
            self.cleanup_cooldowns();
        }

        EngineResult {
            processed: true,
            frame_number: self.frame_count,
            annotated,
            suitable_count: self.counters.suitable,
            unsuitable_count: self.counters.unsuitable,
            line_y: Some(line_y),
            count_deltas,
            rejected,
        }
    }

    /// Drop cooldown entries older than `cooldown_frames`. Only bounds memory;
    /// expiry itself is decided by age in [`Self::cooling_down`].
    fn cleanup_cooldowns(&mut self) {
        let now = self.frame_count;
        let cooldown = self.config.cooldown_frames;
        let before = self.recently_counted.len();
        self.recently_counted
            .retain(|_, counted_at| now.saturating_sub(*counted_at) <= cooldown);
        let purged = before - self.recently_counted.len();
        if purged > 0 {
            log::debug!("frame {}: purged {} cooldown entries", now, purged);
        }
    }

    fn cooling_down(&self, signature: &CrossingSignature) -> bool {
        self.recently_counted
            .get(signature)
            .is_some_and(|counted_at| {
                self.frame_count.saturating_sub(*counted_at) <= self.config.cooldown_frames
            })
    }

    fn within_band(&self, center_y: f32, line_y: i64) -> bool {
        let line = line_y as f64;
        let tolerance = self.config.crossing_tolerance as f64;
        let y = center_y as f64;
        y > line - tolerance && y < line + tolerance
    }

    fn pin_line(&mut self, frame_height: u32) -> i64 {
        if let Some(line_y) = self.line_y {
            return line_y;
        }
        let line_y = (frame_height as f64 * self.config.line_position as f64).floor() as i64;
        log::info!("detection line pinned at y={} (frame height {})", line_y, frame_height);
        self.line_y = Some(line_y);
        line_y
    }

    fn clear(&mut self) {
        self.line_y = None;
        self.previous_objects.clear();
        self.recently_counted.clear();
        self.frame_count = 0;
        self.counters = Counters::default();
    }

    fn unprocessed(&self) -> EngineResult {
        EngineResult {
            processed: false,
            frame_number: self.frame_count,
            annotated: Vec::new(),
            suitable_count: self.counters.suitable,
            unsuitable_count: self.counters.unsuitable,
            line_y: self.line_y,
            count_deltas: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

fn validate_detection(det: &Detection) -> Result<(), EngineError> {
    if det.bbox.is_degenerate() {
        return Err(EngineError::InvalidDetection(format!(
            "degenerate box ({}, {}, {}, {})",
            det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2
        )));
    }
    if !(0.0..=1.0).contains(&det.confidence) {
        return Err(EngineError::InvalidDetection(format!(
            "confidence {} outside 0..=1",
            det.confidence
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CountingEngine {
        let mut engine = CountingEngine::new(EngineConfig {
            line_y: Some(240),
            ..EngineConfig::default()
        })
        .unwrap();
        engine.start().unwrap();
        engine
    }

    fn det(class_id: i64, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(class_id, confidence, BoundingBox::new(x1, y1, x2, y2))
    }

    #[test]
    fn derives_line_from_first_frame_height_and_keeps_it() {
        let mut engine = CountingEngine::new(EngineConfig::default()).unwrap();
        engine.start().unwrap();
        assert_eq!(engine.snapshot().status, "loading");
        let first = engine.process_frame(&[], 480);
        assert_eq!(first.line_y, Some(240));
        let second = engine.process_frame(&[], 720);
        assert_eq!(second.line_y, Some(240));
        assert_eq!(engine.snapshot().status, "running");
    }

    #[test]
    fn below_threshold_is_neither_counted_nor_rendered() {
        let mut engine = engine();
        let out = engine.process_frame(&[det(0, 0.3, 100.0, 235.0, 140.0, 245.0)], 480);
        assert!(out.annotated.is_empty());
        assert_eq!(out.suitable_count, 0);
        assert_eq!(engine.previous_object_count(), 0);
    }

    #[test]
    fn degenerate_box_is_rejected_without_aborting_frame() {
        let mut engine = engine();
        let out = engine.process_frame(
            &[
                det(0, 0.9, 140.0, 235.0, 100.0, 245.0),
                det(1, 0.9, 300.0, 235.0, 340.0, 245.0),
            ],
            480,
        );
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].index, 0);
        assert!(matches!(
            out.rejected[0].error,
            EngineError::InvalidDetection(_)
        ));
        assert_eq!(out.unsuitable_count, 1);
        assert_eq!(out.annotated.len(), 1);
    }

    #[test]
    fn unknown_class_is_rendered_but_not_counted() {
        let mut engine = engine();
        let out = engine.process_frame(&[det(7, 0.9, 100.0, 235.0, 140.0, 245.0)], 480);
        assert_eq!(out.annotated.len(), 1);
        assert!(!out.annotated[0].counted);
        assert!(out.count_deltas.is_empty());
        assert_eq!(engine.counters().total(), 0);
    }

    #[test]
    fn band_is_exclusive_at_tolerance_edges() {
        let mut engine = engine();
        // center_y = 245 sits exactly on line_y + tolerance.
        let out = engine.process_frame(&[det(0, 0.9, 100.0, 240.0, 140.0, 250.0)], 480);
        assert!(out.count_deltas.is_empty());
        // center_y = 244 is inside.
        let out = engine.process_frame(&[det(0, 0.9, 100.0, 239.0, 140.0, 249.0)], 480);
        assert_eq!(out.count_deltas.len(), 1);
    }

    #[test]
    fn separate_regions_count_in_the_same_frame() {
        let mut engine = engine();
        let out = engine.process_frame(
            &[
                det(0, 0.9, 10.0, 235.0, 50.0, 245.0),
                det(0, 0.9, 200.0, 235.0, 240.0, 245.0),
                det(1, 0.9, 400.0, 235.0, 440.0, 245.0),
            ],
            480,
        );
        assert_eq!(out.count_deltas.len(), 3);
        assert_eq!(out.suitable_count, 2);
        assert_eq!(out.unsuitable_count, 1);
        assert_eq!(
            out.count_delta(),
            Some(&CountDelta {
                class: BunchClass::Unsuitable,
                new_total: 1,
                frame_number: 1,
                confidence: 0.9,
            })
        );
    }

    #[test]
    fn cooldown_expires_by_age_before_the_sweep() {
        let mut engine = engine();
        let crossing = det(1, 0.9, 100.0, 235.0, 140.0, 245.0);
        engine.process_frame(&[crossing], 480);
        for _ in 0..30 {
            engine.process_frame(&[], 480);
        }
        // Frame 32: 31 frames after the count, still before the first sweep.
        assert_eq!(engine.cooldown_entries(), 1);
        let out = engine.process_frame(&[crossing], 480);
        assert_eq!(out.unsuitable_count, 2);
    }

    #[test]
    fn cooldown_blocks_reentry_within_window() {
        let mut engine = engine();
        let crossing = det(1, 0.9, 100.0, 235.0, 140.0, 245.0);
        engine.process_frame(&[crossing], 480);
        engine.process_frame(&[], 480);
        let out = engine.process_frame(&[crossing], 480);
        assert!(out.count_deltas.is_empty());
        assert_eq!(out.unsuitable_count, 1);
    }

    #[test]
    fn sweep_runs_on_configured_interval() {
        let mut engine = CountingEngine::new(EngineConfig {
            line_y: Some(240),
            cooldown_frames: 5,
            cleanup_interval: 10,
            ..EngineConfig::default()
        })
        .unwrap();
        engine.start().unwrap();
        engine.process_frame(&[det(0, 0.9, 100.0, 235.0, 140.0, 245.0)], 480);
        for _ in 0..8 {
            engine.process_frame(&[], 480);
        }
        assert_eq!(engine.frame_count(), 9);
        assert_eq!(engine.cooldown_entries(), 1);
        engine.process_frame(&[], 480);
        assert_eq!(engine.cooldown_entries(), 0);
    }

    #[test]
    fn restart_clears_line_and_state() {
        let mut engine = CountingEngine::new(EngineConfig::default()).unwrap();
        engine.start().unwrap();
        engine.process_frame(&[det(0, 0.9, 100.0, 235.0, 140.0, 245.0)], 480);
        assert_eq!(engine.counters().suitable, 1);
        let summary = engine.stop().unwrap();
        assert_eq!(summary.suitable_count, 1);
        assert_eq!(summary.frames_processed, 1);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.line_y(), None);
        engine.start().unwrap();
        let out = engine.process_frame(&[], 720);
        assert_eq!(out.line_y, Some(360));
        assert_eq!(out.frame_number, 1);
    }

    #[test]
    fn idle_engine_ignores_frames() {
        let mut engine = CountingEngine::new(EngineConfig::default()).unwrap();
        let out = engine.process_frame(&[det(0, 0.9, 100.0, 235.0, 140.0, 245.0)], 480);
        assert!(!out.processed);
        assert_eq!(engine.frame_count(), 0);
    }

    #[test]
    fn construction_fails_fast_on_bad_config() {
        let err = CountingEngine::new(EngineConfig {
            tracking_distance: 0,
            ..EngineConfig::default()
        })
        .err()
        .expect("config error");
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
