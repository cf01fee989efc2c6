use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Stage and progress reporting on stderr for the offline tools.
#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn from_args(ui_flag: &str, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        let mode = match ui_flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        let pretty = stderr_is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_is_tty,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.spinner(format!("{name}…"));
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Running frame/count ticker for a replay.
    pub fn frames(&self, source: &str) -> FrameTicker {
        if self.pretty {
            FrameTicker {
                spinner: self.spinner(format!("{source}: starting")),
                source: source.to_string(),
                start: Instant::now(),
            }
        } else {
            eprintln!("==> Replay {}", source);
            FrameTicker {
                spinner: None,
                source: source.to_string(),
                start: Instant::now(),
            }
        }
    }

    fn spinner(&self, message: String) -> Option<ProgressBar> {
        if !self.pretty {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        Some(spinner)
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

pub struct FrameTicker {
    spinner: Option<ProgressBar>,
    source: String,
    start: Instant,
}

impl FrameTicker {
    pub fn update(&self, frames: u64, ripe: u64, unripe: u64) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{}: frame {} ripe={} unripe={}",
                self.source, frames, ripe, unripe
            ));
        }
    }

    pub fn finish(self, frames: u64) {
        let message = format!(
            "✔ {} frames from {} ({})",
            frames,
            self.source,
            format_duration(self.start.elapsed())
        );
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
