use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::ModelSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::classes::{ClassRemap, ClassTable, RemapMode};
use crate::detect::result::{BBox, Detection, RawDetection};

// Second pass around anchor boxes (the driver): margins are fractions of the
// anchor box, the crop runs at a low backend threshold and hits overlapping
// an existing same-class box are dropped.
const CROP_MARGIN: f32 = 0.2;
const CROP_EXTRA_BELOW: f32 = 0.3;
const CROP_CONFIDENCE: f32 = 0.1;
const CROP_DUPLICATE_IOU: f32 = 0.45;

/// Shared, thread-safe handle to one loaded model.
///
/// Cloning is cheap; every clone drives the same backend. The backend is
/// wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`,
/// so concurrent jobs serialise on inference and nothing else.
#[derive(Clone)]
pub struct Detector {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    backend_name: &'static str,
    model_classes: ClassTable,
    remap: Option<ClassRemap>,
}

impl Detector {
    /// Wrap a loaded backend. A failing warm-up is a load failure.
    pub fn new<B: DetectorBackend + 'static>(mut backend: B) -> Result<Self> {
        backend.warm_up()?;
        let backend_name = backend.name();
        let model_classes = backend.class_table().clone();
        let preview: Vec<&str> = model_classes.names().take(5).collect();
        log::info!(
            "detector ready: backend={} classes={} {:?}{}",
            backend_name,
            model_classes.len(),
            preview,
            if model_classes.len() > 5 { "..." } else { "" }
        );
        Ok(Self {
            backend: Arc::new(Mutex::new(backend)),
            backend_name,
            model_classes,
            remap: None,
        })
    }

    /// Load the configured model. Failure here is fatal for the service.
    #[cfg(feature = "backend-tract")]
    pub fn load(settings: &ModelSettings) -> Result<Self> {
        let mut backend = crate::detect::backends::TractBackend::new(&settings.path, settings.input_size)?
            .with_iou_threshold(settings.iou_threshold);
        if let Some(names) = &settings.class_names {
            backend = backend.with_classes(ClassTable::new(names.clone())?);
        }
        Ok(Self::new(backend)?.with_remap_mode(settings.class_remap))
    }

    #[cfg(not(feature = "backend-tract"))]
    pub fn load(settings: &ModelSettings) -> Result<Self> {
        Err(anyhow!(
            "cannot load {}: model inference requires the backend-tract feature",
            settings.path.display()
        ))
    }

    /// Fold model labels onto another table (see [`ClassRemap`]).
    pub fn with_remap(mut self, remap: Option<ClassRemap>) -> Self {
        if let Some(remap) = &remap {
            log::info!(
                "remapping {} model classes onto {:?}",
                self.model_classes.len(),
                remap.target().names().collect::<Vec<_>>()
            );
        }
        self.remap = remap;
        self
    }

    pub fn with_remap_mode(self, mode: RemapMode) -> Self {
        let remap = ClassRemap::resolve(mode, &self.model_classes);
        self.with_remap(remap)
    }

    pub fn name(&self) -> &'static str {
        self.backend_name
    }

    /// Class table of emitted detections (after any remap).
    pub fn class_table(&self) -> &ClassTable {
        match &self.remap {
            Some(remap) => remap.target(),
            None => &self.model_classes,
        }
    }

    /// Detect objects in a frame, keeping `confidence >= confidence_threshold`.
    ///
    /// Inference failures are logged and yield no detections so a single bad
    /// frame does not abort a long job.
    pub fn infer(&self, frame: &RgbImage, confidence_threshold: f32) -> Vec<Detection> {
        match self.try_infer(frame, confidence_threshold) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!(
                    "inference failed on {}x{} frame, treating as empty: {:#}",
                    frame.width(),
                    frame.height(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Like [`Detector::infer`], but surfaces backend errors.
    pub fn try_infer(&self, frame: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("empty frame"));
        }
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        let raw = guard.detect(frame, confidence_threshold)?;
        let mut detections: Vec<Detection> = raw
            .into_iter()
            .filter_map(|r| self.label(r, frame, confidence_threshold))
            .collect();

        if let Some(anchor) = self.remap.as_ref().and_then(ClassRemap::anchor) {
            let anchors: Vec<Detection> = detections
                .iter()
                .filter(|d| d.class_id == anchor)
                .cloned()
                .collect();
            for person in &anchors {
                for hit in self.detect_in_crop(&mut *guard, frame, person, anchor, confidence_threshold) {
                    let duplicate = detections
                        .iter()
                        .any(|d| d.class_id == hit.class_id && d.bbox.iou(&hit.bbox) > CROP_DUPLICATE_IOU);
                    if !duplicate {
                        detections.push(hit);
                    }
                }
            }
        }
        Ok(detections)
    }

    /// Re-run the backend on the region around an anchor box, widened to
    /// take in the hands, and return non-anchor hits in frame coordinates.
    fn detect_in_crop(
        &self,
        backend: &mut dyn DetectorBackend,
        frame: &RgbImage,
        person: &Detection,
        anchor: u32,
        confidence_threshold: f32,
    ) -> Vec<Detection> {
        let (frame_w, frame_h) = frame.dimensions();
        let x1 = person.bbox.x1 as u32;
        let y1 = person.bbox.y1 as u32;
        let x2 = person.bbox.x2 as u32;
        let y2 = person.bbox.y2 as u32;
        let box_w = x2.saturating_sub(x1);
        let box_h = y2.saturating_sub(y1);
        let margin_x = (box_w as f32 * CROP_MARGIN) as u32;
        let margin_y = (box_h as f32 * CROP_MARGIN) as u32;
        let below = (box_h as f32 * CROP_EXTRA_BELOW) as u32;

        let crop_x1 = x1.saturating_sub(margin_x);
        let crop_y1 = y1.saturating_sub(margin_y);
        let crop_x2 = (x2 + margin_x).min(frame_w);
        let crop_y2 = (y2 + margin_y + below).min(frame_h);
        if crop_x2 <= crop_x1 || crop_y2 <= crop_y1 {
            return Vec::new();
        }
        let crop = image::imageops::crop_imm(
            frame,
            crop_x1,
            crop_y1,
            crop_x2 - crop_x1,
            crop_y2 - crop_y1,
        )
        .to_image();

        let raw = match backend.detect(&crop, CROP_CONFIDENCE) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("crop detection around driver box failed: {:#}", e);
                return Vec::new();
            }
        };
        let (dx, dy) = (crop_x1 as f32, crop_y1 as f32);
        raw.into_iter()
            .filter_map(|r| self.label(r, &crop, confidence_threshold))
            .filter(|d| d.class_id != anchor)
            .map(|mut d| {
                d.bbox = BBox::new(d.bbox.x1 + dx, d.bbox.y1 + dy, d.bbox.x2 + dx, d.bbox.y2 + dy);
                d
            })
            .collect()
    }

    fn label(&self, raw: RawDetection, frame: &RgbImage, confidence_threshold: f32) -> Option<Detection> {
        if !(raw.confidence >= confidence_threshold && raw.confidence <= 1.0) {
            return None;
        }
        let bbox = raw.bbox.clipped(frame.width(), frame.height());
        if !bbox.is_valid() {
            log::debug!("dropping degenerate box {:?}", raw.bbox);
            return None;
        }
        let Some(source_name) = self.model_classes.name(raw.class_id) else {
            log::debug!("dropping detection with unknown class id {}", raw.class_id);
            return None;
        };

        let (class_id, class_name) = match &self.remap {
            Some(remap) => {
                let id = remap.map(source_name)?;
                (id, remap.target().name(id)?.to_string())
            }
            None => (raw.class_id, source_name.to_string()),
        };

        Some(Detection {
            class_id,
            class_name,
            confidence: raw.confidence,
            bbox,
        })
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("backend", &self.backend_name)
            .field("classes", &self.class_table().len())
            .field("remap", &self.remap.is_some())
            .finish()
    }
}
