//! Annotated video outputs.
//!
//! A sink is opened once with the source's `VideoInfo` and then receives
//! every frame of the source in order, append-only. Resolution and frame rate
//! always follow the source.

pub mod file;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod file_ffmpeg;

use anyhow::{anyhow, bail, Result};
use image::RgbImage;

use crate::frame::VideoInfo;

pub use file::FileSink;

pub trait VideoSink {
    /// Prepare the output for frames described by `info`. Failure here
    /// fails the job before any frame is processed.
    fn open(&mut self, info: &VideoInfo) -> Result<()>;

    /// Append one frame. Its dimensions must match the opened resolution.
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the output.
    fn finish(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
    fn open(&mut self, info: &VideoInfo) -> Result<()> {
        (**self).open(info)
    }

    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn frames_written(&self) -> u64 {
        (**self).frames_written()
    }
}

pub(crate) fn check_dimensions(info: &VideoInfo, frame: &RgbImage) -> Result<()> {
    if frame.dimensions() != (info.width, info.height) {
        bail!(
            "frame is {}x{} but the output was opened at {}x{}",
            frame.width(),
            frame.height(),
            info.width,
            info.height
        );
    }
    Ok(())
}

/// Keeps every written frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    info: Option<VideoInfo>,
    frames: Vec<RgbImage>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self) -> Option<VideoInfo> {
        self.info
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<RgbImage> {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl VideoSink for MemorySink {
    fn open(&mut self, info: &VideoInfo) -> Result<()> {
        if info.width == 0 || info.height == 0 {
            bail!("cannot open output with empty resolution");
        }
        self.info = Some(*info);
        self.frames.clear();
        self.finished = false;
        Ok(())
    }

    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let info = self
            .info
            .ok_or_else(|| anyhow!("write before open"))?;
        if self.finished {
            bail!("write after finish");
        }
        check_dimensions(&info, frame)?;
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> VideoInfo {
        VideoInfo {
            width: 8,
            height: 4,
            fps: 25.0,
            frame_count: 2,
        }
    }

    #[test]
    fn memory_sink_appends_in_order() -> Result<()> {
        let mut sink = MemorySink::new();
        sink.open(&info())?;
        sink.write(&RgbImage::from_pixel(8, 4, image::Rgb([1, 0, 0])))?;
        sink.write(&RgbImage::from_pixel(8, 4, image::Rgb([2, 0, 0])))?;
        sink.finish()?;
        assert_eq!(sink.frames_written(), 2);
        assert_eq!(sink.frames()[1].get_pixel(0, 0)[0], 2);
        assert!(sink.is_finished());
        Ok(())
    }

    #[test]
    fn rejects_resolution_change_and_unopened_writes() -> Result<()> {
        let mut sink = MemorySink::new();
        assert!(sink.write(&RgbImage::new(8, 4)).is_err());
        sink.open(&info())?;
        assert!(sink.write(&RgbImage::new(4, 4)).is_err());
        Ok(())
    }
}
