//! Synthetic frame source for tests and dry runs.
//!
//! Each frame carries its own index in the first pixel (24-bit, big-endian
//! across R, G, B) so detectors under test can tell frames apart without a
//! side channel.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::frame::{Frame, FrameSource, SourceItem, VideoInfo};

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            frame_count: 300,
        }
    }
}

impl SyntheticConfig {
    /// Parse a `stub://name?frames=300&fps=30&width=640&height=480` path.
    /// Missing parameters keep their defaults.
    pub fn from_stub_path(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub path: {}", path))?;
        let mut cfg = Self::default();
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(cfg);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            let bad = || anyhow!("invalid value '{}' for stub parameter '{}'", value, key);
            match key {
                "frames" => cfg.frame_count = value.parse().map_err(|_| bad())?,
                "fps" => cfg.fps = value.parse().map_err(|_| bad())?,
                "width" => cfg.width = value.parse().map_err(|_| bad())?,
                "height" => cfg.height = value.parse().map_err(|_| bad())?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(cfg)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    next_index: u64,
    corrupt: BTreeSet<u64>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            next_index: 0,
            corrupt: BTreeSet::new(),
        }
    }

    /// Report these indices as undecodable.
    pub fn with_corrupt_frames<I: IntoIterator<Item = u64>>(mut self, indices: I) -> Self {
        self.corrupt.extend(indices);
        self
    }

    fn render(&self, index: u64) -> RgbImage {
        let mut image = RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let v = ((x as u64 + y as u64 + index) % 256) as u8;
            Rgb([v, v.wrapping_mul(3), 255 - v])
        });
        image.put_pixel(0, 0, encode_index(index));
        image
    }
}

impl FrameSource for SyntheticSource {
    fn info(&self) -> VideoInfo {
        VideoInfo {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            frame_count: self.config.frame_count,
        }
    }

    fn next_frame(&mut self) -> Result<Option<SourceItem>> {
        if self.next_index >= self.config.frame_count {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;

        if self.corrupt.contains(&index) {
            return Ok(Some(SourceItem::Corrupt {
                index,
                reason: "synthetic corrupt frame".to_string(),
            }));
        }
        Ok(Some(SourceItem::Frame(Frame::new(index, self.render(index)))))
    }
}

fn encode_index(index: u64) -> Rgb<u8> {
    Rgb([
        ((index >> 16) & 0xff) as u8,
        ((index >> 8) & 0xff) as u8,
        (index & 0xff) as u8,
    ])
}

/// Recover the frame index stamped by [`SyntheticSource`].
pub fn synthetic_frame_index(image: &RgbImage) -> Option<u64> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let [r, g, b] = image.get_pixel(0, 0).0;
    Some(((r as u64) << 16) | ((g as u64) << 8) | b as u64)
}
