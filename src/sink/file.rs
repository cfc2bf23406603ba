//! Video container output.
//!
//! `FileSink` encodes frames into a local container with FFmpeg (H.264,
//! falling back to MPEG-4 Part 2 when no H.264 encoder is available). Without
//! the `video-ffmpeg` feature, opening fails and so does the job.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use image::RgbImage;

#[cfg(feature = "video-ffmpeg")]
use super::file_ffmpeg::FfmpegEncoder;
use super::{check_dimensions, VideoSink};
use crate::frame::VideoInfo;

pub struct FileSink {
    path: PathBuf,
    info: Option<VideoInfo>,
    frames_written: u64,
    #[cfg(feature = "video-ffmpeg")]
    encoder: Option<FfmpegEncoder>,
}

impl FileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            info: None,
            frames_written: 0,
            #[cfg(feature = "video-ffmpeg")]
            encoder: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VideoSink for FileSink {
    #[cfg(feature = "video-ffmpeg")]
    fn open(&mut self, info: &VideoInfo) -> Result<()> {
        check_encodable(info)?;
        let existed = self.path.exists();
        let encoder = match FfmpegEncoder::create(&self.path, info) {
            Ok(encoder) => encoder,
            Err(e) => {
                if !existed && self.path.exists() {
                    if let Err(rm) = std::fs::remove_file(&self.path) {
                        log::warn!("failed to remove {}: {}", self.path.display(), rm);
                    }
                }
                return Err(e);
            }
        };
        log::info!(
            "writing {} ({}x{} @ {:.2} fps, codec {})",
            self.path.display(),
            info.width,
            info.height,
            info.fps,
            encoder.codec_name()
        );
        self.encoder = Some(encoder);
        self.info = Some(*info);
        Ok(())
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    fn open(&mut self, info: &VideoInfo) -> Result<()> {
        check_encodable(info)?;
        Err(anyhow!(
            "cannot write {}: video encoding requires the video-ffmpeg feature",
            self.path.display()
        ))
    }

    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let info = self
            .info
            .ok_or_else(|| anyhow!("write before open"))?;
        check_dimensions(&info, frame)?;
        #[cfg(feature = "video-ffmpeg")]
        {
            let encoder = self
                .encoder
                .as_mut()
                .ok_or_else(|| anyhow!("output {} already finished", self.path.display()))?;
            encoder.write(frame, self.frames_written)?;
        }
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        #[cfg(feature = "video-ffmpeg")]
        if let Some(encoder) = self.encoder.take() {
            encoder.finish()?;
        }
        if self.info.is_some() {
            log::info!(
                "closed {} after {} frames",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

/// YUV 4:2:0 subsamples chroma 2x2, so both dimensions must be even.
fn check_encodable(info: &VideoInfo) -> Result<()> {
    if info.width == 0 || info.height == 0 {
        return Err(anyhow!("cannot encode empty resolution {}x{}", info.width, info.height));
    }
    if info.width % 2 != 0 || info.height % 2 != 0 {
        return Err(anyhow!(
            "cannot encode {}x{} video: width and height must be even",
            info.width,
            info.height
        ));
    }
    Ok(())
}
