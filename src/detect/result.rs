use serde::{Deserialize, Serialize};

/// Detector output classes that the counter tallies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BunchClass {
    /// Class 0: ripe, suitable for processing.
    Suitable,
    /// Class 1: unripe, unsuitable for processing.
    Unsuitable,
}

impl BunchClass {
    /// Maps a raw detector class id. Ids other than 0 and 1 are not counted.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(Self::Suitable),
            1 => Some(Self::Unsuitable),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Suitable => 0,
            Self::Unsuitable => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Suitable => "Ripe",
            Self::Unsuitable => "Unripe",
        }
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Zero or negative extent, or a coordinate that is not a finite number.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.x2 <= self.x1 || self.y2 <= self.y1
    }
}

/// One detector box for one frame. Never retained past the frame it belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Raw class id as reported by the detector.
    pub class_id: i64,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: i64, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }

    pub fn class(&self) -> Option<BunchClass> {
        BunchClass::from_id(self.class_id)
    }
}

/// Serialized detection shape used by replay files and API payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class: i64,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl From<RawDetection> for Detection {
    fn from(raw: RawDetection) -> Self {
        let [x1, y1, x2, y2] = raw.bbox;
        Detection::new(raw.class, raw.confidence, BoundingBox::new(x1, y1, x2, y2))
    }
}

impl From<&Detection> for RawDetection {
    fn from(det: &Detection) -> Self {
        RawDetection {
            class: det.class_id,
            confidence: det.confidence,
            bbox: [det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2],
        }
    }
}
