//! Driver behavior detection over videos and camera frames.
//!
//! A detection model (behind [`detect::DetectorBackend`]) labels each frame
//! with boxes such as Smoke, Phone or Drink. The pipeline turns a video into
//! per-class counts, percentages and durations, and can render the boxes into
//! an annotated output video of the same length and frame rate.
//!
//! # Architecture
//!
//! - [`detect`]: class tables, the `Detector` handle shared across jobs, backends
//! - [`frame`] / [`ingest`]: decoded frames and the sources that produce them
//! - [`annotate`]: box and label rendering
//! - [`stats`]: per-job aggregation into [`VideoStatistics`]
//! - [`sink`]: annotated video outputs
//! - [`pipeline`]: the frame loop ([`Orchestrator`])
//! - [`job`] / [`artifacts`]: one uploaded video end to end, ephemeral storage
//! - [`session`]: running tally for realtime camera use
//!
//! Video decoding/encoding needs the `video-ffmpeg` feature; ONNX inference
//! needs `backend-tract`. Without them, `stub://` sources and
//! [`detect::StubBackend`] still exercise the whole pipeline.

pub mod annotate;
pub mod artifacts;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod job;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod stats;

pub use annotate::Annotator;
pub use artifacts::ArtifactStore;
pub use config::{DetectionConfig, ModelSettings, ServiceConfig};
pub use detect::{BBox, ClassTable, Detection, Detector, FrameResult};
pub use error::JobError;
pub use frame::{Frame, FrameSource, SourceItem, VideoInfo};
pub use job::{JobOutcome, ProcessingJob};
pub use pipeline::{JobReport, Orchestrator};
pub use session::CameraSession;
pub use sink::{FileSink, MemorySink, VideoSink};
pub use stats::{StatsAggregator, VideoStatistics};
