//! External count display (serial-attached microcontroller).
//!
//! Wire format, one line per message:
//!
//! ```text
//! RIPE:5,UNRIPE:3,STATUS:running\n
//! ```
//!
//! The link to the device is shared: the session publishes counts through
//! [`DisplaySink`] while the control API connects, disconnects, resets and
//! tests the same link.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{TelemetrySink, TelemetryUpdate, UpdateReason};

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Counts written by a test message, easy to spot on the device.
pub const TEST_RIPE: u64 = 99;
pub const TEST_UNRIPE: u64 = 88;

pub type SharedDisplay = Arc<Mutex<DisplayLink>>;

/// Display state reported by the control API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayStatus {
    pub enabled: bool,
    pub connected: bool,
    pub device: Option<String>,
}

impl DisplayStatus {
    /// Status when no display is configured.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            connected: false,
            device: None,
        }
    }
}

/// Connection to a display device.
///
/// Count updates are throttled to one per `send_interval`. Status changes,
/// resets and test messages are always written. A failed write drops the
/// connection until [`DisplayLink::connect`] succeeds again.
pub struct DisplayLink {
    device: Option<PathBuf>,
    writer: Option<Box<dyn Write + Send>>,
    send_interval: Duration,
    last_sent: Option<Instant>,
}

impl DisplayLink {
    /// Link to a device node (e.g. `/dev/ttyUSB0`), not yet opened. Line
    /// settings such as baud rate are expected to be configured on the device.
    pub fn for_device(path: &Path, send_interval: Duration) -> Self {
        Self {
            device: Some(path.to_path_buf()),
            writer: None,
            send_interval,
            last_sent: None,
        }
    }

    /// Link over an already open writer. It cannot be reconnected once dropped.
    pub fn from_writer<W: Write + Send + 'static>(writer: W, send_interval: Duration) -> Self {
        Self {
            device: None,
            writer: Some(Box::new(writer)),
            send_interval,
            last_sent: None,
        }
    }

    pub fn into_shared(self) -> SharedDisplay {
        Arc::new(Mutex::new(self))
    }

    pub fn device(&self) -> Option<&Path> {
        self.device.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn status(&self) -> DisplayStatus {
        DisplayStatus {
            enabled: true,
            connected: self.is_connected(),
            device: self.device.as_ref().map(|p| p.display().to_string()),
        }
    }

    /// Open the device and put it in the stopped state (`0, 0, stopped`).
    pub fn connect(&mut self) -> Result<()> {
        let path = self
            .device
            .clone()
            .ok_or_else(|| anyhow!("display has no device path to connect to"))?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open display device {}", path.display()))?;
        self.writer = Some(Box::new(file));
        self.last_sent = None;
        log::info!("display device connected at {}", path.display());
        self.reset()
    }

    pub fn disconnect(&mut self) {
        if self.writer.take().is_some() {
            log::info!("display device disconnected");
        }
    }

    /// Write `RIPE:0,UNRIPE:0,STATUS:stopped`.
    pub fn reset(&mut self) -> Result<()> {
        self.send_line(0, 0, "stopped")
    }

    /// Write a fixed test message so an operator can check the wiring.
    pub fn send_test(&mut self) -> Result<()> {
        self.send_line(TEST_RIPE, TEST_UNRIPE, "test")
    }

    /// Write one line immediately, ignoring the throttle.
    pub fn send_line(&mut self, ripe: u64, unripe: u64, status: &str) -> Result<()> {
        self.write_line(&format_line(ripe, unripe, status), Instant::now())
    }

    pub(crate) fn publish_at(&mut self, update: &TelemetryUpdate, now: Instant) -> Result<()> {
        if !self.is_connected() {
            log::trace!("display not connected, update skipped");
            return Ok(());
        }
        if update.reason == UpdateReason::Count {
            if let Some(last) = self.last_sent {
                if now.duration_since(last) < self.send_interval {
                    log::trace!("display update throttled");
                    return Ok(());
                }
            }
        }
        self.write_line(&format_message(update), now)
    }

    fn write_line(&mut self, line: &str, now: Instant) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("display not connected"))?;
        let written = writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush());
        if let Err(e) = written {
            self.writer = None;
            return Err(anyhow!("display write failed, link dropped: {}", e));
        }
        self.last_sent = Some(now);
        log::debug!("sent to display: {}", line.trim_end());
        Ok(())
    }
}

/// Session-facing side of a [`DisplayLink`].
pub struct DisplaySink {
    link: SharedDisplay,
}

impl DisplaySink {
    pub fn new(link: SharedDisplay) -> Self {
        Self { link }
    }

    pub fn link(&self) -> SharedDisplay {
        self.link.clone()
    }
}

impl TelemetrySink for DisplaySink {
    fn name(&self) -> &'static str {
        "display"
    }

    fn publish(&mut self, update: &TelemetryUpdate) -> Result<()> {
        self.link
            .lock()
            .map_err(|_| anyhow!("display lock poisoned"))?
            .publish_at(update, Instant::now())
    }
}

pub fn format_message(update: &TelemetryUpdate) -> String {
    format_line(
        update.suitable_count,
        update.unsuitable_count,
        update.status.as_str(),
    )
}

pub fn format_line(ripe: u64, unripe: u64, status: &str) -> String {
    format!("RIPE:{},UNRIPE:{},STATUS:{}\n", ripe, unripe, status)
}
