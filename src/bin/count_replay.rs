//! count_replay - run recorded detections through the counting engine offline
//!
//! Prints a JSON session summary to stdout and optionally writes it to a file.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Instant;

use bunch_counter::{
    capture::{self, Step},
    now_s, open_source, session, storage, CountingEngine, CrossingEvent, EngineConfig, Session,
    SqliteSnapshotStore, StoreSink,
};

#[path = "../ui.rs"]
mod ui;

const TICK_EVERY_FRAMES: u64 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Replay file path or `synthetic://<seed>`.
    source: String,
    /// Frame height used when a replay line omits it.
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Frame width for synthetic sources.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Minimum confidence for a detection to be counted.
    #[arg(long, env = "COUNTER_CONFIDENCE_THRESHOLD")]
    threshold: Option<f32>,
    /// Fixed counting line row in pixels.
    #[arg(long)]
    line_y: Option<u32>,
    /// Region bucket width in pixels.
    #[arg(long)]
    tracking_distance: Option<u32>,
    /// Frames before a crossing signature can count again.
    #[arg(long)]
    cooldown_frames: Option<u64>,
    /// Stop after this many frames (required for synthetic sources).
    #[arg(long)]
    max_frames: Option<u64>,
    /// Persist the session into this snapshot database.
    #[arg(long, env = "COUNTER_DB_PATH")]
    db: Option<String>,
    /// Write the session summary JSON here as well.
    #[arg(long)]
    summary_out: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Debug, Serialize)]
struct ReplaySummary {
    source: String,
    frames_processed: u64,
    suitable_count: u64,
    unsuitable_count: u64,
    total_count: u64,
    rejected_detections: u64,
    skipped_frames: u64,
    duration_ms: u128,
    /// One entry per counted crossing, in order.
    events: Vec<CrossingEvent>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(
        &args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );
    if args.source.starts_with("synthetic://") && args.max_frames.is_none() {
        return Err(anyhow!("synthetic sources need --max-frames"));
    }

    let engine_cfg = engine_config(&args);
    let mut counting = {
        let _stage = ui.stage("Configure engine");
        Session::new(CountingEngine::new(engine_cfg)?)
    };
    if let Some(db) = &args.db {
        let _stage = ui.stage("Open snapshot store");
        let store = storage::shared(SqliteSnapshotStore::open(db)?);
        counting = counting.with_sink(Box::new(StoreSink::new(store)));
    }
    let mut source = {
        let _stage = ui.stage("Open source");
        open_source(&args.source, args.height, args.width)?
    };

    let started = Instant::now();
    counting.start()?;
    let shared = counting.into_shared();
    let ticker = ui.frames(&source.describe());
    let mut rejected_detections = 0u64;
    let mut skipped_frames = 0u64;
    let mut events = Vec::new();
    loop {
        let result = match capture::step(&shared, source.as_mut())? {
            Step::Counted(result) => result,
            Step::Skipped => {
                skipped_frames += 1;
                continue;
            }
            Step::Idle | Step::Exhausted => break,
        };
        rejected_detections += result.rejected.len() as u64;
        if !result.count_deltas.is_empty() {
            let recorded_at = now_s()?;
            events.extend(
                result
                    .count_deltas
                    .iter()
                    .map(|delta| CrossingEvent::from_delta(delta, recorded_at)),
            );
        }
        if result.frame_number % TICK_EVERY_FRAMES == 0 {
            ticker.update(
                result.frame_number,
                result.suitable_count,
                result.unsuitable_count,
            );
        }
        if args.max_frames.is_some_and(|max| result.frame_number >= max) {
            break;
        }
    }
    let stop = session::lock(&shared)?.stop()?;
    ticker.finish(stop.frames_processed);

    let summary = ReplaySummary {
        source: source.describe(),
        frames_processed: stop.frames_processed,
        suitable_count: stop.suitable_count,
        unsuitable_count: stop.unsuitable_count,
        total_count: stop.suitable_count + stop.unsuitable_count,
        rejected_detections,
        skipped_frames,
        duration_ms: started.elapsed().as_millis(),
        events,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(path) = &args.summary_out {
        let _stage = ui.stage("Write summary");
        std::fs::write(path, format!("{json}\n"))
            .with_context(|| format!("failed to write summary {}", path.display()))?;
    }
    println!("{json}");
    Ok(())
}

fn engine_config(args: &Args) -> EngineConfig {
    let defaults = EngineConfig::default();
    EngineConfig {
        confidence_threshold: args.threshold.unwrap_or(defaults.confidence_threshold),
        line_y: args.line_y.or(defaults.line_y),
        tracking_distance: args.tracking_distance.unwrap_or(defaults.tracking_distance),
        cooldown_frames: args.cooldown_frames.unwrap_or(defaults.cooldown_frames),
        ..defaults
    }
}
