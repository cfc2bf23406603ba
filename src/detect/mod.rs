mod backend;
pub mod backends;
mod classes;
mod detector;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use classes::{ClassRemap, ClassTable, RemapMode, BEHAVIOR_CLASSES, NEUTRAL_COLOR};
pub use detector::Detector;
pub use result::{BBox, Detection, FrameResult, RawDetection};
