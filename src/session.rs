//! Session host: one engine plus its telemetry sinks.
//!
//! A session is owned by one context. Hosts that run capture and status
//! queries on different threads share it as [`SharedSession`] and hold the
//! lock for exactly one call at a time.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::detect::Detection;
use crate::engine::{CountSnapshot, CountingEngine, EngineResult, EngineState, StopSummary};
use crate::error::EngineError;
use crate::sink::{SinkStatus, TelemetrySink, TelemetryUpdate, UpdateReason};
use crate::storage::CrossingEvent;

pub type SharedSession = Arc<Mutex<Session>>;

pub struct Session {
    engine: CountingEngine,
    sinks: Vec<Box<dyn TelemetrySink>>,
    last_summary: Option<StopSummary>,
}

impl Session {
    pub fn new(engine: CountingEngine) -> Self {
        Self {
            engine,
            sinks: Vec::new(),
            last_summary: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        log::info!("telemetry sink registered: {}", sink.name());
        self.sinks.push(sink);
        self
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn engine(&self) -> &CountingEngine {
        &self.engine
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn snapshot(&self) -> CountSnapshot {
        self.engine.snapshot()
    }

    /// Totals of the most recently stopped session.
    pub fn last_summary(&self) -> Option<StopSummary> {
        self.last_summary
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.engine.start()?;
        log::info!("counting session started");
        self.publish(UpdateReason::StatusChange);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.engine.pause()?;
        log::info!("counting session paused");
        self.publish(UpdateReason::StatusChange);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.engine.resume()?;
        log::info!("counting session resumed");
        self.publish(UpdateReason::StatusChange);
        Ok(())
    }

    /// Stop and reset. Sinks see `(0, 0, stopped)`.
    pub fn stop(&mut self) -> Result<StopSummary, EngineError> {
        let summary = self.engine.stop()?;
        log::info!(
            "counting session stopped: ripe={} unripe={} frames={}",
            summary.suitable_count,
            summary.unsuitable_count,
            summary.frames_processed
        );
        self.last_summary = Some(summary);
        self.publish(UpdateReason::StatusChange);
        Ok(summary)
    }

    pub fn process_frame(&mut self, detections: &[Detection], frame_height: u32) -> EngineResult {
        let result = self.engine.process_frame(detections, frame_height);
        if !result.count_deltas.is_empty() {
            self.publish(UpdateReason::Count);
            self.record_crossings(&result);
        }
        result
    }

    fn record_crossings(&mut self, result: &EngineResult) {
        let recorded_at = match crate::now_s() {
            Ok(now) => now,
            Err(err) => {
                log::warn!("crossing events not recorded: {}", err);
                return;
            }
        };
        for delta in &result.count_deltas {
            let event = CrossingEvent::from_delta(delta, recorded_at);
            log::debug!(
                "crossing: {} conf={:.2} frame={} total={}",
                event.label,
                event.confidence,
                event.frame_number,
                event.new_total
            );
            for sink in self.sinks.iter_mut() {
                if let Err(err) = sink.record_crossing(&event) {
                    log::warn!("telemetry sink {} dropped crossing: {}", sink.name(), err);
                }
            }
        }
    }

    fn publish(&mut self, reason: UpdateReason) {
        let counters = self.engine.counters();
        let update = TelemetryUpdate {
            suitable_count: counters.suitable,
            unsuitable_count: counters.unsuitable,
            status: SinkStatus::from(self.engine.state()),
            reason,
            frame_number: self.engine.frame_count(),
        };
        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.publish(&update) {
                log::warn!("telemetry sink {} failed: {}", sink.name(), err);
            }
        }
    }
}

/// Lock a shared session, mapping poisoning to an error.
pub fn lock(session: &SharedSession) -> Result<MutexGuard<'_, Session>> {
    session
        .lock()
        .map_err(|_| anyhow!("counting session lock poisoned"))
}
