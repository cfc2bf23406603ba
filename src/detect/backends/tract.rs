#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::classes::ClassTable;
use crate::detect::result::RawDetection;
use crate::detect::yolo::{self, DEFAULT_IOU_THRESHOLD};

/// Tract-based backend for YOLOv8-format ONNX detectors.
///
/// The class table comes from the model's `names` metadata when present,
/// falling back to the behavior classes.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    iou_threshold: f32,
    classes: ClassTable,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(anyhow!("model file not found: {}", model_path.display()));
        }
        log::info!("loading model {}", model_path.display());

        let onnx = tract_onnx::onnx();
        let proto = onnx
            .proto_model_for_path(model_path)
            .with_context(|| format!("failed to read ONNX model from {}", model_path.display()))?;
        let classes = match proto.metadata_props.iter().find(|p| p.key == "names") {
            Some(entry) => ClassTable::from_model_metadata(&entry.value)
                .context("invalid class names in model metadata")?,
            None => {
                log::warn!("model has no class names metadata, using behavior classes");
                ClassTable::behaviors()
            }
        };

        let size = input_size as usize;
        let model = onnx
            .model_for_proto_model(&proto)
            .context("failed to build ONNX graph")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            classes,
        })
    }

    /// Override the model's own class names.
    pub fn with_classes(mut self, classes: ClassTable) -> Self {
        if classes.len() != self.classes.len() {
            log::warn!(
                "class override has {} names, model metadata has {}",
                classes.len(),
                self.classes.len()
            );
        }
        self.classes = classes;
        self
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &RgbImage) -> Result<(Tensor, yolo::Letterbox)> {
        let (input, letterbox) = yolo::letterbox(frame, self.input_size)?;
        let size = self.input_size as usize;
        let tensor = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), yolo::to_chw(&input))
            .context("build input tensor")?
            .into_tensor();
        Ok((tensor, letterbox))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_table(&self) -> &ClassTable {
        &self.classes
    }

    fn detect(&mut self, frame: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let shape = view.shape().to_vec();
        let [_, channels, anchors] = shape[..] else {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        };
        let data: Vec<f32> = view.iter().take(channels * anchors).copied().collect();

        let candidates = yolo::decode(&data, channels, anchors, &letterbox, confidence_threshold)?;
        Ok(yolo::non_max_suppression(candidates, self.iou_threshold))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank, 1.0).map(|_| ())
    }
}
