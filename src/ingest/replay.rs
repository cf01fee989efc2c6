//! JSON-lines detection replay.
//!
//! One frame per line:
//!
//! ```text
//! {"height":480,"detections":[{"class":0,"confidence":0.9,"bbox":[100,235,140,245]}]}
//! ```
//!
//! `height` may be omitted to use the configured frame height. A blank line
//! is a frame with no detections.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use super::{DetectionFrame, FrameSource};
use crate::detect::{Detection, RawDetection};

#[derive(Debug, Deserialize)]
struct ReplayLine {
    height: Option<u32>,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

pub struct ReplaySource<R: BufRead + Send = BufReader<File>> {
    origin: String,
    lines: Lines<R>,
    line_no: usize,
    default_height: u32,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path, default_height: u32) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        Ok(Self::from_reader(
            BufReader::new(file),
            path.display().to_string(),
            default_height,
        ))
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.origin)
    }
}

impl<R: BufRead + Send> ReplaySource<R> {
    pub fn from_reader(reader: R, origin: String, default_height: u32) -> Self {
        Self {
            origin,
            lines: reader.lines(),
            line_no: 0,
            default_height,
        }
    }

    fn parse_line(&self, line: &str) -> Result<DetectionFrame> {
        if line.trim().is_empty() {
            return Ok(DetectionFrame {
                height: self.default_height,
                detections: Vec::new(),
            });
        }
        let parsed: ReplayLine = serde_json::from_str(line)
            .map_err(|e| anyhow!("{}:{}: invalid frame: {}", self.origin, self.line_no, e))?;
        Ok(DetectionFrame {
            height: parsed.height.unwrap_or(self.default_height),
            detections: parsed.detections.into_iter().map(Detection::from).collect(),
        })
    }
}

impl<R: BufRead + Send> FrameSource for ReplaySource<R> {
    fn describe(&self) -> String {
        format!("replay:{}", self.origin)
    }

    fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        let Some(line) = self.lines.next() else {
            return Ok(None);
        };
        self.line_no += 1;
        let line = line.with_context(|| format!("{}:{}: read failed", self.origin, self.line_no))?;
        self.parse_line(&line).map(Some)
    }
}
