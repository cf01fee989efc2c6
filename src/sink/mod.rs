//! Telemetry sinks.
//!
//! Sinks receive the two running totals and a coarse status whenever a
//! count changes or the session changes state. They own every downstream
//! side effect: display devices, persistence, dashboard pushes.
//!
//! Sinks MUST NOT assume their errors are retried. The session logs a
//! failed publish and moves on; engine state is never affected.

use anyhow::Result;
use serde::Serialize;
use std::fmt;

use crate::engine::EngineState;
use crate::storage::CrossingEvent;

#[cfg(feature = "dashboard-http")]
pub mod dashboard;
pub mod display;
pub mod store;

#[cfg(feature = "dashboard-http")]
pub use dashboard::{DashboardConfig, DashboardSink};
pub use display::{DisplayLink, DisplaySink, DisplayStatus, SharedDisplay};
pub use store::StoreSink;

/// Status reported to sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkStatus {
    Running,
    Paused,
    Stopped,
}

impl SinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl From<EngineState> for SinkStatus {
    fn from(state: EngineState) -> Self {
        match state {
            EngineState::Running => Self::Running,
            EngineState::Paused => Self::Paused,
            EngineState::Idle | EngineState::Stopped => Self::Stopped,
        }
    }
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an update was published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    Count,
    StatusChange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TelemetryUpdate {
    pub suitable_count: u64,
    pub unsuitable_count: u64,
    pub status: SinkStatus,
    pub reason: UpdateReason,
    pub frame_number: u64,
}

impl TelemetryUpdate {
    pub fn total_count(&self) -> u64 {
        self.suitable_count + self.unsuitable_count
    }
}

/// Consumer of count and status updates.
pub trait TelemetrySink: Send {
    /// Sink identifier used in logs.
    fn name(&self) -> &'static str;

    fn publish(&mut self, update: &TelemetryUpdate) -> Result<()>;

    /// Called once per counted crossing, after the count update for its frame.
    fn record_crossing(&mut self, _event: &CrossingEvent) -> Result<()> {
        Ok(())
    }
}
