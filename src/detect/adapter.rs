use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

/// Number of values in one detector output row: `x1, y1, x2, y2, confidence, class`.
pub const ROW_LEN: usize = 6;

/// Converts a detector's per-frame output into [`Detection`] values.
///
/// Confidence filtering and box validation happen in the counting engine,
/// not here.
pub struct FrameDetections;

impl FrameDetections {
    /// Convert a single `[x1, y1, x2, y2, confidence, class]` row.
    pub fn from_row(row: &[f32]) -> Result<Detection> {
        if row.len() != ROW_LEN {
            return Err(anyhow!(
                "detector row has {} values, expected {}",
                row.len(),
                ROW_LEN
            ));
        }
        let class = row[5];
        if !class.is_finite() || class.fract() != 0.0 {
            return Err(anyhow!("detector row has non-integral class {}", class));
        }
        Ok(Detection::new(
            class as i64,
            row[4],
            BoundingBox::new(row[0], row[1], row[2], row[3]),
        ))
    }

    /// Convert every row of a frame. Malformed rows are dropped with a warning;
    /// one bad row never discards the rest of the frame.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Vec<Detection> {
        rows.iter()
            .enumerate()
            .filter_map(|(idx, row)| match Self::from_row(row.as_ref()) {
                Ok(det) => Some(det),
                Err(err) => {
                    log::warn!("dropping detector row {}: {}", idx, err);
                    None
                }
            })
            .collect()
    }
}
