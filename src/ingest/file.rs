//! Local video file frame source.
//!
//! `VideoFileSource` reads frames from a local container that the upload
//! layer already stored and validated. `stub://` paths yield synthetic
//! frames and need no codec support.

use anyhow::{anyhow, Result};

#[cfg(feature = "video-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
use crate::frame::{FrameSource, SourceItem, VideoInfo};

/// Local video file frame source.
pub struct VideoFileSource {
    path: String,
    backend: FileBackend,
    frames_read: u64,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl VideoFileSource {
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "video ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticSource::new(SyntheticConfig::from_stub_path(path)?))
        } else {
            open_container(path)?
        };

        let source = Self {
            path: path.to_string(),
            backend,
            frames_read: 0,
        };
        let info = source.info();
        log::info!(
            "video {}: {}x{}, {:.2} fps, {} frames",
            source.path,
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );
        Ok(source)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Frames handed out so far, including corrupt positions.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

#[cfg(feature = "video-ffmpeg")]
fn open_container(path: &str) -> Result<FileBackend> {
    Ok(FileBackend::Ffmpeg(FfmpegFileSource::open(path)?))
}

#[cfg(not(feature = "video-ffmpeg"))]
fn open_container(_path: &str) -> Result<FileBackend> {
    Err(anyhow!(
        "video file decoding requires the video-ffmpeg feature"
    ))
}

impl FrameSource for VideoFileSource {
    fn info(&self) -> VideoInfo {
        match &self.backend {
            FileBackend::Synthetic(source) => source.info(),
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.info(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<SourceItem>> {
        let item = match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame()?,
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame()?,
        };
        if item.is_some() {
            self.frames_read += 1;
        }
        Ok(item)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
