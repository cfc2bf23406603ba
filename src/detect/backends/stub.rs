use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::classes::ClassTable;
use crate::detect::result::RawDetection;

type DetectFn = Box<dyn FnMut(&RgbImage) -> Result<Vec<RawDetection>> + Send>;

/// Stub backend for testing and dry runs.
///
/// Without a script it detects nothing. A script sees each frame and returns
/// whatever detections (or error) the test needs. Every `detect` call bumps
/// a shared invocation counter.
pub struct StubBackend {
    classes: ClassTable,
    script: Option<DetectFn>,
    invocations: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new(classes: ClassTable) -> Self {
        Self {
            classes,
            script: None,
            invocations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_fn<F>(mut self, script: F) -> Self
    where
        F: FnMut(&RgbImage) -> Result<Vec<RawDetection>> + Send + 'static,
    {
        self.script = Some(Box::new(script));
        self
    }

    /// Counter of `detect` calls, readable after the backend moves into a `Detector`.
    pub fn invocations(&self) -> Arc<AtomicU64> {
        self.invocations.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(ClassTable::behaviors())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_table(&self) -> &ClassTable {
        &self.classes
    }

    fn detect(&mut self, frame: &RgbImage, _confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.script.as_mut() {
            Some(script) => script(frame),
            None => Ok(Vec::new()),
        }
    }
}
