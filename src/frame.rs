//! Decoded frames and the sources that produce them.
//!
//! - `Frame`: one decoded RGB bitmap with its position in the source.
//! - `VideoInfo`: resolution, frame rate and declared length of a source.
//! - `FrameSource`: lazy, finite, forward-only sequence of frames.
//!
//! All frames are RGB8, row-major, no padding. Sources convert whatever the
//! container holds into that layout before handing frames out.

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

/// One decoded frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based position in the source.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Static properties of a frame source.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Native frame rate. Zero when unknown (e.g. a still image).
    pub fps: f64,
    /// Declared frame count. May be an estimate for some containers.
    pub frame_count: u64,
}

impl VideoInfo {
    /// Seconds covered by `frames` frames at the native rate.
    pub fn seconds_for(&self, frames: u64) -> f64 {
        if self.fps > 0.0 {
            frames as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Timestamp of frame `index`.
    pub fn timestamp(&self, index: u64) -> f64 {
        self.seconds_for(index)
    }
}

/// Result of pulling one position from a source.
#[derive(Debug)]
pub enum SourceItem {
    Frame(Frame),
    /// The frame at `index` could not be decoded. The source stays usable.
    Corrupt { index: u64, reason: String },
}

impl SourceItem {
    pub fn index(&self) -> u64 {
        match self {
            SourceItem::Frame(frame) => frame.index,
            SourceItem::Corrupt { index, .. } => *index,
        }
    }
}

/// Forward-only sequence of decoded frames.
///
/// `Ok(None)` marks exhaustion. `Err` is fatal for the job (I/O failure,
/// container truncated beyond recovery); a single undecodable frame is
/// reported as [`SourceItem::Corrupt`] instead.
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    fn next_frame(&mut self) -> Result<Option<SourceItem>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn info(&self) -> VideoInfo {
        (**self).info()
    }

    fn next_frame(&mut self) -> Result<Option<SourceItem>> {
        (**self).next_frame()
    }
}
