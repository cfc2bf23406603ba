use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates, `x1 < x2`, `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// True when all coordinates are finite and the box has positive extent.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clip the box into a `width x height` frame.
    pub fn clipped(&self, width: u32, height: u32) -> BBox {
        let w = width as f32;
        let h = height as f32;
        BBox {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// Unlabelled backend output, before threshold filtering and naming.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// One labelled detection. Never mutated after the detector emits it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    /// Label text drawn next to the box, e.g. `Phone: 87.5%`.
    pub fn label(&self) -> String {
        format!("{}: {:.1}%", self.class_name, self.confidence * 100.0)
    }
}

/// Detections for one processed frame, in detector emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    pub timestamp_seconds: f64,
    pub detections: Vec<Detection>,
}

impl FrameResult {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
