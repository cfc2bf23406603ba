//! Frame-processing orchestration.
//!
//! `Orchestrator::process` drives one video job: it pulls frames in source
//! order, runs inference on every `frame_skip`-th frame, accumulates
//! statistics, and forwards every frame (annotated or not) to the optional
//! sink so the output keeps the source's length and frame rate.
//!
//! Per-frame problems (undecodable frame, failed inference) are logged and
//! counted as zero detections. Job-level problems (bad config, source I/O,
//! sink open/write, cancellation) fail the job with a [`JobError`]; no
//! statistics are returned in that case.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use crate::annotate::Annotator;
use crate::config::DetectionConfig;
use crate::detect::{Detection, Detector, FrameResult};
use crate::error::{JobError, SINK_OPEN_FAILED, SINK_WRITE_FAILED, SOURCE_READ_FAILED};
use crate::frame::{FrameSource, SourceItem, VideoInfo};
use crate::sink::VideoSink;
use crate::stats::{StatsAggregator, VideoStatistics};

const PROGRESS_EVERY: u64 = 100;

/// Outcome of a completed video job.
#[derive(Clone, Debug, Serialize)]
pub struct JobReport {
    pub video: VideoInfo,
    /// Frames pulled from the source, including corrupt ones.
    pub frames_read: u64,
    /// Frames selected by the frame-skip stride.
    pub processed_frames: u64,
    pub statistics: VideoStatistics,
    /// One entry per processed frame, in source order.
    pub frames: Vec<FrameResult>,
}

/// Shared entry point for video jobs and single-frame requests.
///
/// Cheap to clone; clones share the detector and may run on different
/// threads at the same time. Each `process` call owns its own statistics.
#[derive(Clone)]
pub struct Orchestrator {
    detector: Detector,
    annotator: Arc<Annotator>,
}

impl Orchestrator {
    pub fn new(detector: Detector) -> Self {
        let annotator = Annotator::new(detector.class_table().clone());
        Self::with_annotator(detector, annotator)
    }

    pub fn with_annotator(detector: Detector, annotator: Annotator) -> Self {
        Self {
            detector,
            annotator: Arc::new(annotator),
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Run a whole video job to completion.
    pub fn process(
        &self,
        source: &mut dyn FrameSource,
        config: &DetectionConfig,
        mut sink: Option<&mut dyn VideoSink>,
        cancel: Option<&AtomicBool>,
    ) -> Result<JobReport, JobError> {
        config.validate()?;
        let info = source.info();
        if let Some(sink) = sink.as_deref_mut() {
            sink.open(&info)
                .map_err(|e| JobError::from_anyhow(SINK_OPEN_FAILED, &e))?;
        }

        let interval = if info.fps > 0.0 {
            f64::from(config.frame_skip) / info.fps
        } else {
            0.0
        };
        let mut stats = StatsAggregator::new(self.detector.class_table()).with_frame_interval(interval);
        let mut frames = Vec::new();
        let mut frames_read = 0u64;
        let mut last_written: Option<RgbImage> = None;

        loop {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                log::warn!("job cancelled after {} frames", frames_read);
                return Err(JobError::cancelled(frames_read));
            }
            let item = match source.next_frame() {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => return Err(JobError::from_anyhow(SOURCE_READ_FAILED, &e)),
            };
            frames_read += 1;
            let index = item.index();
            let selected = config.is_processed(index);

            match item {
                SourceItem::Frame(frame) => {
                    let mut image = frame.image;
                    if selected {
                        let detections = self.detector.infer(&image, config.confidence_threshold);
                        stats.record(&detections);
                        if sink.is_some() && !detections.is_empty() {
                            self.annotator.draw_mut(&mut image, &detections);
                        }
                        frames.push(frame_result(&info, index, detections));
                    }
                    if let Some(sink) = sink.as_deref_mut() {
                        write_frame(sink, &image, index)?;
                        last_written = Some(image);
                    }
                }
                SourceItem::Corrupt { index, reason } => {
                    log::warn!("frame {} could not be decoded, counting no detections: {}", index, reason);
                    if selected {
                        stats.record(&[]);
                        frames.push(frame_result(&info, index, Vec::new()));
                    }
                    if let Some(sink) = sink.as_deref_mut() {
                        // Repeat the last frame; before any frame exists, write black.
                        let filler = last_written
                            .get_or_insert_with(|| RgbImage::new(info.width, info.height));
                        write_frame(sink, filler, index)?;
                    }
                }
            }

            if frames_read % PROGRESS_EVERY == 0 {
                if info.frame_count > 0 {
                    log::info!(
                        "progress: {}/{} frames ({:.1}%)",
                        frames_read,
                        info.frame_count,
                        100.0 * frames_read as f64 / info.frame_count as f64
                    );
                } else {
                    log::info!("progress: {} frames", frames_read);
                }
            }
        }

        if let Some(sink) = sink.as_deref_mut() {
            sink.finish()
                .map_err(|e| JobError::from_anyhow(SINK_WRITE_FAILED, &e))?;
        }

        let statistics = stats.summarize(info.seconds_for(frames_read));
        log::info!(
            "job complete: {} frames read, {} processed, {} detections over {:.2}s",
            frames_read,
            frames.len(),
            statistics.total,
            statistics.video_duration_seconds
        );
        Ok(JobReport {
            video: info,
            frames_read,
            processed_frames: frames.len() as u64,
            statistics,
            frames,
        })
    }

    /// Detect on one still frame. Keeps no state between calls.
    pub fn process_frame(&self, frame: &RgbImage, config: &DetectionConfig) -> Result<FrameResult, JobError> {
        config.validate()?;
        let detections = self.detector.infer(frame, config.confidence_threshold);
        Ok(FrameResult {
            frame_index: 0,
            timestamp_seconds: 0.0,
            detections,
        })
    }

    /// Like [`Orchestrator::process_frame`], also returning the rendered frame.
    pub fn process_frame_annotated(
        &self,
        frame: &RgbImage,
        config: &DetectionConfig,
    ) -> Result<(FrameResult, RgbImage), JobError> {
        let result = self.process_frame(frame, config)?;
        let annotated = self.annotator.draw(frame, &result.detections);
        Ok((result, annotated))
    }
}

fn frame_result(info: &VideoInfo, index: u64, detections: Vec<Detection>) -> FrameResult {
    FrameResult {
        frame_index: index,
        timestamp_seconds: info.timestamp(index),
        detections,
    }
}

fn write_frame(sink: &mut dyn VideoSink, image: &RgbImage, index: u64) -> Result<(), JobError> {
    sink.write(image).map_err(|e| {
        JobError::new(SINK_WRITE_FAILED, format!("frame {}: {:#}", index, e))
    })
}
