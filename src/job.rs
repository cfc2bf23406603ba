//! One uploaded video processed end to end.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

use crate::artifacts::new_job_id;
use crate::config::DetectionConfig;
use crate::error::{JobError, SOURCE_OPEN_FAILED};
use crate::frame::{FrameSource, VideoInfo};
use crate::ingest::VideoFileSource;
use crate::pipeline::{JobReport, Orchestrator};
use crate::sink::{FileSink, VideoSink};

/// Result of a successful job: the report plus where the annotated video is.
#[derive(Clone, Debug, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub output_path: Option<PathBuf>,
    #[serde(flatten)]
    pub report: JobReport,
}

/// Owns everything a video job needs. Consumed by [`ProcessingJob::run`],
/// which releases the source and sink whether the job succeeds or not.
pub struct ProcessingJob {
    id: String,
    source: Box<dyn FrameSource>,
    config: DetectionConfig,
    sink: Option<Box<dyn VideoSink>>,
    output_path: Option<PathBuf>,
}

impl ProcessingJob {
    pub fn new(source: Box<dyn FrameSource>, config: DetectionConfig) -> Self {
        Self {
            id: new_job_id(),
            source,
            config,
            sink: None,
            output_path: None,
        }
    }

    /// Open a stored upload (or a `stub://` path) as the job's source.
    pub fn open(path: &str, config: DetectionConfig) -> Result<Self, JobError> {
        let source = VideoFileSource::open(path)
            .map_err(|e| JobError::from_anyhow(SOURCE_OPEN_FAILED, &e))?;
        Ok(Self::new(Box::new(source), config))
    }

    /// Write annotated frames to a video file at `path`. A partially written
    /// file is removed when the job fails after the output was opened.
    pub fn with_output_file<P: AsRef<Path>>(self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        self.with_sink_at(Box::new(FileSink::new(path.clone())), path)
    }

    /// Attach a sink that writes to `path`, reported in the outcome and
    /// cleaned up like [`ProcessingJob::with_output_file`].
    pub fn with_sink_at<P: Into<PathBuf>>(mut self, sink: Box<dyn VideoSink>, path: P) -> Self {
        self.sink = Some(sink);
        self.output_path = Some(path.into());
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run(
        mut self,
        orchestrator: &Orchestrator,
        cancel: Option<&AtomicBool>,
    ) -> Result<JobOutcome, JobError> {
        log::info!("job {} started", self.id);
        let mut sink = self.sink.take().map(|inner| TrackedSink {
            inner,
            opened: false,
        });
        let result = orchestrator.process(
            self.source.as_mut(),
            &self.config,
            sink.as_mut().map(|s| s as &mut dyn VideoSink),
            cancel,
        );
        let opened = sink.as_ref().is_some_and(|s| s.opened);
        // Close the output before touching the file on disk.
        drop(sink);

        match result {
            Ok(report) => Ok(JobOutcome {
                job_id: self.id,
                output_path: self.output_path,
                report,
            }),
            Err(err) => {
                log::error!("job {} failed: {}", self.id, err);
                // A file the job never opened is not ours to remove.
                if let (true, Some(path)) = (opened, &self.output_path) {
                    discard_partial_output(path);
                }
                Err(err)
            }
        }
    }
}

/// Remembers whether the wrapped sink opened successfully.
struct TrackedSink {
    inner: Box<dyn VideoSink>,
    opened: bool,
}

impl VideoSink for TrackedSink {
    fn open(&mut self, info: &VideoInfo) -> Result<()> {
        self.inner.open(info)?;
        self.opened = true;
        Ok(())
    }

    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        self.inner.write(frame)
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    fn frames_written(&self) -> u64 {
        self.inner.frames_written()
    }
}

fn discard_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove partial output {}: {}", path.display(), e),
    }
}
