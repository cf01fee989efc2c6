//! Frame-local identity keys.
//!
//! There is no tracker. Identity across consecutive frames is approximated by
//! quantizing the horizontal center into buckets `tracking_distance` pixels
//! wide and comparing key sets frame to frame.

use crate::detect::BunchClass;

/// Left edge of the horizontal bucket that contains `center_x`.
pub fn region_x(center_x: f32, tracking_distance: u32) -> i64 {
    let width = tracking_distance as f64;
    ((center_x as f64 / width).floor() * width) as i64
}

/// Identifies a detection within one frame: `(class, region_x, round(center_y))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub class_id: i64,
    pub region_x: i64,
    pub center_y: i64,
}

impl ObjectKey {
    pub fn new(class_id: i64, region_x: i64, center_y: f32) -> Self {
        Self {
            class_id,
            region_x,
            center_y: center_y.round() as i64,
        }
    }
}

/// Cooldown key: `(class, region_x, line_y)`.
///
/// Coarser than [`ObjectKey`]: every detection of one class in one bucket that
/// crosses the line shares a signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CrossingSignature {
    pub class: BunchClass,
    pub region_x: i64,
    pub line_y: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_buckets_floor_to_tracking_distance() {
        assert_eq!(region_x(0.0, 80), 0);
        assert_eq!(region_x(79.9, 80), 0);
        assert_eq!(region_x(80.0, 80), 80);
        assert_eq!(region_x(120.0, 80), 80);
        assert_eq!(region_x(-1.0, 80), -80);
    }

    #[test]
    fn object_key_rounds_center_y() {
        assert_eq!(ObjectKey::new(0, 80, 239.6).center_y, 240);
        assert_eq!(ObjectKey::new(0, 80, 239.4).center_y, 239);
    }
}
