//! Fruit-bunch line-crossing counter.
//!
//! Counts ripe and unripe palm-oil fruit bunches as they ride a conveyor
//! past a horizontal counting line. A detector upstream produces per-frame
//! bounding boxes; this crate turns those boxes into stable totals and
//! pushes the totals to a serial display, a local snapshot database and an
//! optional dashboard.
//!
//! # Module Structure
//!
//! - `detect`: detection records and the detector row adapter
//! - `engine`: line-crossing counting engine and its lifecycle
//! - `session`: engine plus telemetry sinks behind one lock
//! - `sink`: display, snapshot-store and dashboard publishers
//! - `storage`: count snapshot persistence
//! - `ingest`: detection frame sources (replay files, synthetic conveyor)
//! - `capture`: frame loop feeding a shared session
//! - `api`: loopback HTTP control surface
//! - `config`: file and environment configuration

use anyhow::{anyhow, Result};
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod session;
pub mod sink;
pub mod storage;

pub use config::CounterConfig;
pub use detect::{BoundingBox, BunchClass, Detection, FrameDetections, RawDetection};
pub use engine::{
    CountDelta, CountSnapshot, Counters, CountingEngine, EngineConfig, EngineResult, EngineState,
    StopSummary,
};
pub use error::EngineError;
pub use ingest::{open_source, DetectionFrame, FrameSource, ReplaySource, SyntheticConveyor};
pub use session::{Session, SharedSession};
pub use sink::{
    DisplayLink, DisplaySink, DisplayStatus, SharedDisplay, SinkStatus, StoreSink, TelemetrySink,
    TelemetryUpdate,
};
pub use storage::{
    CountRecord, CrossingEvent, CrossingRecord, InMemorySnapshotStore, NewCountRecord, SharedStore, SnapshotStore,
    SqliteSnapshotStore,
};

/// Unique shared-cache in-memory SQLite URI, for tests and dry runs.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:bunch_counter_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before unix epoch"))?
        .as_secs())
}
