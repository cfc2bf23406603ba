//! Single still image as a one-frame source.

use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

use crate::frame::{Frame, FrameSource, SourceItem, VideoInfo};

pub struct StillImageSource {
    image: Option<RgbImage>,
    info: VideoInfo,
}

impl StillImageSource {
    pub fn new(image: RgbImage) -> Self {
        let info = VideoInfo {
            width: image.width(),
            height: image.height(),
            fps: 0.0,
            frame_count: 1,
        };
        Self {
            image: Some(image),
            info,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?
            .to_rgb8();
        Ok(Self::new(image))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_image(bytes).map(Self::new)
    }
}

impl FrameSource for StillImageSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<SourceItem>> {
        Ok(self
            .image
            .take()
            .map(|image| SourceItem::Frame(Frame::new(0, image))))
    }
}

/// Decode an uploaded still (JPEG or PNG) into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(anyhow!("image payload is empty"));
    }
    let image = image::load_from_memory(bytes).context("failed to decode image payload")?;
    Ok(image.to_rgb8())
}

/// Encode a frame as JPEG for transport back to a client.
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    frame
        .write_to(&mut out, ImageFormat::Jpeg)
        .context("failed to encode frame as JPEG")?;
    Ok(out.into_inner())
}
