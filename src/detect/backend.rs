use anyhow::Result;
use image::RgbImage;

use crate::detect::classes::ClassTable;
use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// A backend wraps one loaded model. It receives a decoded RGB frame and
/// returns unlabelled detections in frame pixel coordinates. Resizing or
/// letterboxing to the model input is the backend's own concern.
///
/// `detect` takes `&mut self`; callers that share a backend across jobs go
/// through [`crate::detect::Detector`], which serialises access.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class table of the loaded model.
    fn class_table(&self) -> &ClassTable;

    /// Run detection on a frame.
    ///
    /// Backends may prune candidates below `confidence_threshold` early;
    /// the caller filters again so backends are not required to.
    fn detect(&mut self, frame: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
