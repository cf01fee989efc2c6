mod adapter;
mod result;

pub use adapter::{FrameDetections, ROW_LEN};
pub use result::{BoundingBox, BunchClass, Detection, RawDetection};
