//! counterd - fruit-bunch counting daemon
//!
//! This daemon:
//! 1. Pulls detection frames from the configured source (replay file or synthetic conveyor)
//! 2. Feeds them through the counting engine while the session is running
//! 3. Publishes totals to the snapshot store, the display device and the dashboard
//! 4. Serves the loopback control API (start/pause/resume/stop, counts, snapshots)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use bunch_counter::{
    api::{ApiConfig, ApiServer},
    capture::{self, LoopOptions},
    config::CounterConfig,
    open_source, session, storage, CountingEngine, DisplayLink, DisplaySink, Session,
    SharedDisplay, SqliteSnapshotStore, StoreSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file.
    #[arg(long, env = "COUNTER_CONFIG")]
    config: Option<PathBuf>,
    /// Start counting immediately instead of waiting for POST /start.
    #[arg(long)]
    autostart: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = CounterConfig::load_from(args.config.as_deref())?;

    let store = storage::shared(SqliteSnapshotStore::open(&cfg.db_path)?);
    let engine = CountingEngine::new(cfg.engine.clone())?;
    let mut counting = Session::new(engine).with_sink(Box::new(StoreSink::new(store.clone())));

    let display = open_display(&cfg);
    if let Some(link) = &display {
        counting = counting.with_sink(Box::new(DisplaySink::new(link.clone())));
    }
    counting = attach_dashboard(counting, &cfg);

    let shared = counting.into_shared();
    let mut api = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        shared.clone(),
        Some(store),
    );
    if let Some(link) = display {
        api = api.with_display(link);
    }
    let api_handle = api.spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut source = open_source(&cfg.source.locator, cfg.source.height, cfg.source.width)?;
    log::info!(
        "counterd running. source={} db={} api={}",
        source.describe(),
        cfg.db_path,
        api_handle.addr
    );
    if args.autostart {
        session::lock(&shared)?.start()?;
    } else {
        log::info!("waiting for POST /start on {}", api_handle.addr);
    }

    let options = LoopOptions {
        frame_interval: cfg.frame_interval(),
        ..LoopOptions::default()
    };
    let outcome = capture::run(&shared, source.as_mut(), &options, &mut || {
        rx.try_recv().is_ok()
    });
    let finished = capture::finish(&shared);
    log::info!("stopping control api...");
    api_handle.stop()?;
    finished?;

    let outcome = outcome?;
    log::info!(
        "capture loop ended: frames={} skipped={} exhausted={}",
        outcome.frames,
        outcome.skipped,
        outcome.exhausted
    );
    Ok(())
}

/// Open the display link and write the initial stopped line. A missing
/// device is not fatal; the API can connect it later.
fn open_display(cfg: &CounterConfig) -> Option<SharedDisplay> {
    if !cfg.display.enabled {
        return None;
    }
    let mut link = DisplayLink::for_device(&cfg.display.device, cfg.display.send_interval);
    if let Err(e) = link.connect() {
        log::warn!(
            "display device {} unavailable, continuing without it: {}",
            cfg.display.device.display(),
            e
        );
    }
    Some(link.into_shared())
}

#[cfg(feature = "dashboard-http")]
fn attach_dashboard(counting: Session, cfg: &CounterConfig) -> Session {
    use bunch_counter::sink::{DashboardConfig, DashboardSink};

    match &cfg.dashboard {
        Some(dashboard) => counting.with_sink(Box::new(DashboardSink::new(DashboardConfig {
            base_url: dashboard.url.clone(),
            timeout: dashboard.timeout,
        }))),
        None => counting,
    }
}

#[cfg(not(feature = "dashboard-http"))]
fn attach_dashboard(counting: Session, cfg: &CounterConfig) -> Session {
    if cfg.dashboard.is_some() {
        log::warn!("dashboard url configured but built without the dashboard-http feature");
    }
    counting
}
