//! Capture loop: pulls detection frames from a source into a shared session.
//!
//! Each step checks the session state, reads one frame and counts it under a
//! single session lock, so a pause or stop issued from the API never lands
//! between the read and the count. Unreadable frames are logged and skipped;
//! only source exhaustion or a shutdown request ends the loop.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::engine::{EngineResult, EngineState, StopSummary};
use crate::ingest::FrameSource;
use crate::session::{self, SharedSession};

pub const DEFAULT_HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What one call to [`step`] did.
#[derive(Debug)]
pub enum Step {
    /// A frame was read and fed to the engine.
    Counted(EngineResult),
    /// The session is not running; the source was left untouched.
    Idle,
    /// The source returned an unreadable frame, which was dropped.
    Skipped,
    /// The source has no more frames.
    Exhausted,
}

#[derive(Clone, Copy, Debug)]
pub struct LoopOptions {
    /// Minimum time between frame reads.
    pub frame_interval: Duration,
    pub health_interval: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::ZERO,
            health_interval: DEFAULT_HEALTH_LOG_INTERVAL,
        }
    }
}

/// Totals for one [`run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub frames: u64,
    pub skipped: u64,
    /// True when the loop ended because the source ran dry.
    pub exhausted: bool,
}

/// Read and count one frame if the session is running.
pub fn step(shared: &SharedSession, source: &mut dyn FrameSource) -> Result<Step> {
    let mut counting = session::lock(shared)?;
    if counting.state() != EngineState::Running {
        return Ok(Step::Idle);
    }
    match source.next_frame() {
        Ok(Some(frame)) => {
            let result = counting.process_frame(&frame.detections, frame.height);
            for rejected in &result.rejected {
                log::warn!(
                    "frame {}: detection {} dropped: {}",
                    result.frame_number,
                    rejected.index,
                    rejected.error
                );
            }
            Ok(Step::Counted(result))
        }
        Ok(None) => Ok(Step::Exhausted),
        Err(e) => {
            log::warn!("{}: frame skipped: {:#}", source.describe(), e);
            Ok(Step::Skipped)
        }
    }
}

/// Drive `source` until it is exhausted or `shutdown` returns true.
///
/// Does not stop the session; call [`finish`] afterwards on every path.
pub fn run(
    shared: &SharedSession,
    source: &mut dyn FrameSource,
    options: &LoopOptions,
    shutdown: &mut dyn FnMut() -> bool,
) -> Result<RunOutcome> {
    let mut outcome = RunOutcome::default();
    let mut last_health_log = Instant::now();
    loop {
        if shutdown() {
            log::info!("shutdown requested");
            break;
        }
        let tick = Instant::now();

        match step(shared, source)? {
            Step::Counted(_) => outcome.frames += 1,
            Step::Skipped => outcome.skipped += 1,
            Step::Idle => {}
            Step::Exhausted => {
                log::info!("source {} exhausted", source.describe());
                outcome.exhausted = true;
                break;
            }
        }

        if last_health_log.elapsed() >= options.health_interval {
            log_health(shared)?;
            last_health_log = Instant::now();
        }

        if let Some(rest) = options.frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    Ok(outcome)
}

/// Stop an active session so sinks close its record.
pub fn finish(shared: &SharedSession) -> Result<Option<StopSummary>> {
    let mut counting = session::lock(shared)?;
    if !matches!(counting.state(), EngineState::Running | EngineState::Paused) {
        return Ok(None);
    }
    let summary = counting.stop()?;
    log::info!(
        "final totals: ripe={} unripe={} frames={}",
        summary.suitable_count,
        summary.unsuitable_count,
        summary.frames_processed
    );
    Ok(Some(summary))
}

fn log_health(shared: &SharedSession) -> Result<()> {
    let snapshot = session::lock(shared)?.snapshot();
    log::info!(
        "status={} frames={} ripe={} unripe={} line_y={:?}",
        snapshot.status,
        snapshot.frame_count,
        snapshot.suitable_count,
        snapshot.unsuitable_count,
        snapshot.line_y
    );
    Ok(())
}
