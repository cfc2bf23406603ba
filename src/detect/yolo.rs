//! YOLOv8 pre/post-processing independent of the inference runtime.
//!
//! Input: square letterboxed RGB, NCHW, scaled to 0..1.
//! Output: `[1, 4 + num_classes, anchors]`, each anchor `cx, cy, w, h, scores...`
//! in letterboxed input pixels.

use anyhow::{anyhow, Result};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};

use crate::detect::result::{BBox, RawDetection};

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const PAD_VALUE: u8 = 114;
const CXYWH_OFFSET: usize = 4;

/// Mapping between frame pixels and letterboxed model input pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    pub fn new(frame_width: u32, frame_height: u32, input_size: u32) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(anyhow!(
                "cannot letterbox an empty {}x{} frame",
                frame_width,
                frame_height
            ));
        }
        let size = input_size as f32;
        let scale = (size / frame_width as f32).min(size / frame_height as f32);
        let new_w = (frame_width as f32 * scale).round();
        let new_h = (frame_height as f32 * scale).round();
        Ok(Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
            frame_width,
            frame_height,
        })
    }

    /// Map a box from model input space back into the frame, clipped to its bounds.
    pub fn unmap(&self, bbox: BBox) -> BBox {
        BBox {
            x1: (bbox.x1 - self.pad_x) / self.scale,
            y1: (bbox.y1 - self.pad_y) / self.scale,
            x2: (bbox.x2 - self.pad_x) / self.scale,
            y2: (bbox.y2 - self.pad_y) / self.scale,
        }
        .clipped(self.frame_width, self.frame_height)
    }
}

/// Resize `frame` into a padded `input_size` square, preserving aspect ratio.
pub fn letterbox(frame: &RgbImage, input_size: u32) -> Result<(RgbImage, Letterbox)> {
    let lb = Letterbox::new(frame.width(), frame.height(), input_size)?;
    let new_w = ((frame.width() as f32 * lb.scale).round() as u32).clamp(1, input_size);
    let new_h = ((frame.height() as f32 * lb.scale).round() as u32).clamp(1, input_size);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([PAD_VALUE; 3]));
    imageops::replace(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);
    Ok((canvas, lb))
}

/// Planar CHW float data in 0..1 for a letterboxed input.
pub fn to_chw(input: &RgbImage) -> Vec<f32> {
    let (w, h) = (input.width() as usize, input.height() as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, pixel) in input.enumerate_pixels() {
        let idx = y as usize * w + x as usize;
        for channel in 0..3 {
            data[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }
    data
}

/// Decode raw predictions into frame-space detections above `confidence_threshold`.
///
/// `data` is the row-major `[4 + num_classes, anchors]` slice of one batch item.
pub fn decode(
    data: &[f32],
    num_channels: usize,
    num_anchors: usize,
    letterbox: &Letterbox,
    confidence_threshold: f32,
) -> Result<Vec<RawDetection>> {
    if num_channels <= CXYWH_OFFSET {
        return Err(anyhow!(
            "prediction has {} channels, expected more than {}",
            num_channels,
            CXYWH_OFFSET
        ));
    }
    let expected = num_channels
        .checked_mul(num_anchors)
        .ok_or_else(|| anyhow!("prediction dimensions overflow"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "expected {} prediction values, received {}",
            expected,
            data.len()
        ));
    }

    let at = |channel: usize, anchor: usize| data[channel * num_anchors + anchor];
    let mut out = Vec::new();
    for anchor in 0..num_anchors {
        let (class_id, confidence) = (CXYWH_OFFSET..num_channels)
            .map(|c| (c - CXYWH_OFFSET, at(c, anchor)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !confidence.is_finite() || confidence < confidence_threshold {
            continue;
        }

        let cx = at(0, anchor);
        let cy = at(1, anchor);
        let w = at(2, anchor);
        let h = at(3, anchor);
        let bbox = letterbox.unmap(BBox::new(
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
        ));
        if !bbox.is_valid() {
            continue;
        }
        out.push(RawDetection::new(class_id as u32, confidence, bbox));
    }
    Ok(out)
}

/// Per-class non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
