//! Detection overlay rendering.
//!
//! Boxes are drawn in a per-class color with a filled label tab holding
//! `"{class}: {confidence:.1}%"`. Everything is clamped to the frame, so a
//! box on the image edge never writes out of bounds.

use std::path::Path;

use ab_glyph::{FontArc, FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::{ClassTable, Detection};

const BOX_THICKNESS: i32 = 2;
const LABEL_PADDING: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
// Glyph metrics used to size label tabs if the bundled font fails to parse.
const FALLBACK_CHAR_WIDTH: u32 = 7;
const FALLBACK_TEXT_HEIGHT: u32 = 12;

/// DejaVu Sans Mono, shipped so labels always carry text.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono.ttf");

pub struct Annotator {
    classes: ClassTable,
    font: Option<FontArc>,
}

impl Annotator {
    /// Annotator using the bundled label font.
    pub fn new(classes: ClassTable) -> Self {
        let font = match FontArc::try_from_slice(BUNDLED_FONT) {
            Ok(font) => Some(font),
            Err(e) => {
                log::error!("bundled label font is unreadable, labels drawn without text: {}", e);
                None
            }
        };
        Self { classes, font }
    }

    /// Replace the label font.
    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(FontArc::new(font));
        self
    }

    /// Load a TTF/OTF file for label text instead of the bundled font.
    pub fn with_font_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(self.with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render onto a copy of `frame`. With no detections the copy is
    /// bit-identical to the input.
    pub fn draw(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut out = frame.clone();
        self.draw_mut(&mut out, detections);
        out
    }

    /// Render in place onto a caller-owned frame.
    pub fn draw_mut(&self, frame: &mut RgbImage, detections: &[Detection]) {
        if frame.width() == 0 || frame.height() == 0 {
            return;
        }
        for detection in detections {
            let color = self.classes.color(detection.class_id);
            let Some(rect) = clamp_box(detection, frame.width(), frame.height()) else {
                continue;
            };
            draw_box(frame, rect, color);
            self.draw_label(frame, rect, &detection.label(), color);
        }
    }

    fn draw_label(&self, frame: &mut RgbImage, anchor: Rect, label: &str, color: Rgb<u8>) {
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(PxScale::from(LABEL_SCALE), font, label),
            None => (
                FALLBACK_CHAR_WIDTH * label.chars().count() as u32,
                FALLBACK_TEXT_HEIGHT,
            ),
        };
        let (frame_w, frame_h) = frame.dimensions();
        let tab_w = (text_w + 2 * LABEL_PADDING).clamp(1, frame_w);
        let tab_h = (text_h + 2 * LABEL_PADDING).clamp(1, frame_h);

        // Above the box when it fits, otherwise just inside its top edge.
        let top = anchor.top();
        let tab_y = if top >= tab_h as i32 {
            top - tab_h as i32
        } else {
            top.min(frame_h as i32 - tab_h as i32)
        };
        let tab_x = anchor.left().min(frame_w as i32 - tab_w as i32).max(0);

        draw_filled_rect_mut(frame, Rect::at(tab_x, tab_y).of_size(tab_w, tab_h), color);
        if let Some(font) = &self.font {
            draw_text_mut(
                frame,
                TEXT_COLOR,
                tab_x + LABEL_PADDING as i32,
                tab_y + LABEL_PADDING as i32,
                PxScale::from(LABEL_SCALE),
                font,
                label,
            );
        }
    }
}

/// Pixel rectangle of a detection, limited to the frame.
fn clamp_box(detection: &Detection, width: u32, height: u32) -> Option<Rect> {
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;
    let x1 = detection.bbox.x1.floor().clamp(0.0, max_x) as i32;
    let y1 = detection.bbox.y1.floor().clamp(0.0, max_y) as i32;
    let x2 = detection.bbox.x2.ceil().clamp(0.0, max_x) as i32;
    let y2 = detection.bbox.y2.ceil().clamp(0.0, max_y) as i32;
    if x2 < x1 || y2 < y1 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32))
}

fn draw_box(frame: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        let w = rect.width() as i32 - 2 * inset;
        let h = rect.height() as i32 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(frame, ring, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    fn detection(class_id: u32, bbox: BBox) -> Detection {
        Detection {
            class_id,
            class_name: "Phone".to_string(),
            confidence: 0.873,
            bbox,
        }
    }

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
    }

    #[test]
    fn no_detections_is_bit_identical() {
        let frame = gradient(64, 48);
        let out = Annotator::new(ClassTable::behaviors()).draw(&frame, &[]);
        assert_eq!(out.as_raw(), frame.as_raw());
    }

    #[test]
    fn draws_box_in_class_color() {
        let classes = ClassTable::behaviors();
        let expected = classes.color(1);
        let frame = RgbImage::new(100, 100);
        let out = Annotator::new(classes).draw(&frame, &[detection(1, BBox::new(20.0, 40.0, 60.0, 80.0))]);
        assert_eq!(*out.get_pixel(20, 60), expected);
        assert_eq!(*out.get_pixel(21, 60), expected);
        assert_eq!(*out.get_pixel(40, 60), Rgb([0, 0, 0]));
        // Label tab sits above the box; its left padding column is plain color.
        assert_eq!(*out.get_pixel(0, 38), expected);
        assert_eq!(*out.get_pixel(1, 38), expected);
    }

    #[test]
    fn label_tab_carries_glyphs_by_default() {
        let classes = ClassTable::behaviors();
        let color = classes.color(1);
        let annotator = Annotator::new(classes);
        assert!(annotator.has_font());

        let frame = RgbImage::new(200, 200);
        let det = Detection {
            class_id: 1,
            class_name: "Phone".to_string(),
            confidence: 0.9,
            bbox: BBox::new(60.0, 80.0, 140.0, 150.0),
        };
        let out = annotator.draw(&frame, &[det]);

        // The tab occupies the rows just above the box.
        let mut tab = 0;
        let mut glyph = 0;
        for y in 60..80 {
            for x in 60..180 {
                let px = *out.get_pixel(x, y);
                if px == color {
                    tab += 1;
                } else if px != Rgb([0, 0, 0]) {
                    glyph += 1;
                }
            }
        }
        assert!(tab > 0, "no label tab drawn");
        assert!(glyph > 0, "label tab has no text");
    }

    #[test]
    fn custom_font_file_overrides_bundled_font() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, BUNDLED_FONT)?;
        let annotator = Annotator::new(ClassTable::behaviors()).with_font_file(file.path())?;
        assert!(annotator.has_font());
        Ok(())
    }

    #[test]
    fn edge_boxes_stay_in_bounds() {
        let frame = RgbImage::new(40, 30);
        let annotator = Annotator::new(ClassTable::behaviors());
        let dets = vec![
            detection(0, BBox::new(0.0, 0.0, 40.0, 30.0)),
            detection(2, BBox::new(35.0, 0.0, 40.0, 5.0)),
            detection(9, BBox::new(-10.0, 25.0, 80.0, 45.0)),
        ];
        let out = annotator.draw(&frame, &dets);
        assert_eq!(out.dimensions(), (40, 30));
        assert_eq!(*out.get_pixel(39, 29), NEUTRAL_GRAY);
    }

    #[test]
    fn unknown_class_uses_neutral_color() {
        let frame = RgbImage::new(50, 50);
        let out = Annotator::new(ClassTable::behaviors())
            .draw(&frame, &[detection(42, BBox::new(10.0, 30.0, 40.0, 45.0))]);
        assert_eq!(*out.get_pixel(10, 40), NEUTRAL_GRAY);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let result = Annotator::new(ClassTable::behaviors()).with_font_file("/nonexistent/font.ttf");
        assert!(result.is_err());
    }

    const NEUTRAL_GRAY: Rgb<u8> = crate::detect::NEUTRAL_COLOR;
}
