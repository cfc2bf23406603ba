//! drivewatch - detect driver behaviors in videos and still frames.
//!
//! `video` runs a whole file through the pipeline and writes an annotated
//! copy next to the configured output directory; `frame` handles one image.
//! Results are printed as JSON on stdout, logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drivewatch::ingest::{encode_jpeg, StillImageSource};
use drivewatch::{
    Annotator, ArtifactStore, DetectionConfig, Detector, Orchestrator, ProcessingJob,
    ServiceConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect smoking, phone use and drinking in driver videos"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a video file (or a stub:// synthetic source).
    Video {
        input: String,

        /// Annotated video path. Defaults to <output_dir>/annotated_<name>.mp4.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Minimum confidence for a detection to count.
        #[arg(long)]
        confidence: Option<f32>,

        /// Run inference on every Nth frame.
        #[arg(long)]
        frame_skip: Option<u32>,

        /// Only compute statistics, do not write a video.
        #[arg(long)]
        no_annotate: bool,

        /// Also write the JSON report to this file.
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Process a single still image.
    Frame {
        image: PathBuf,

        /// Write the annotated frame as JPEG.
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        confidence: Option<f32>,
    },
    /// Remove stale uploads and outputs.
    Cleanup,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = ServiceConfig::load()?;

    if let Command::Cleanup = args.command {
        let store = ArtifactStore::from_settings(&cfg.artifacts)?;
        let removed = store.cleanup_older_than(cfg.artifacts.max_age)?;
        println!("{}", serde_json::json!({ "removed": removed }));
        return Ok(());
    }

    let detector = Detector::load(&cfg.model)
        .with_context(|| format!("failed to load model {}", cfg.model.path.display()))?;
    let mut annotator = Annotator::new(detector.class_table().clone());
    if let Some(font) = &cfg.font_path {
        annotator = annotator.with_font_file(font)?;
        log::info!("label font: {}", font.display());
    }
    let orchestrator = Orchestrator::with_annotator(detector, annotator);

    match args.command {
        Command::Video {
            input,
            output,
            confidence,
            frame_skip,
            no_annotate,
            json,
        } => {
            let config = DetectionConfig::new(
                confidence.unwrap_or(cfg.detection.confidence_threshold),
                frame_skip.unwrap_or(cfg.detection.frame_skip),
            );
            let store = ArtifactStore::from_settings(&cfg.artifacts)?;
            if let Err(e) = store.cleanup_older_than(cfg.artifacts.max_age) {
                log::warn!("artifact cleanup failed: {:#}", e);
            }

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancel);
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::Relaxed);
            })
            .context("error setting Ctrl-C handler")?;

            let mut job = ProcessingJob::open(&input, config)?;
            if !no_annotate {
                let path = output.unwrap_or_else(|| store.output_path_for(Path::new(&input)));
                job = job.with_output_file(path);
            }
            let outcome = job.run(&orchestrator, Some(cancel.as_ref()))?;

            let rendered = serde_json::to_string_pretty(&outcome)?;
            if let Some(path) = json {
                std::fs::write(&path, &rendered)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            println!("{}", rendered);
        }
        Command::Frame {
            image,
            output,
            confidence,
        } => {
            let config = DetectionConfig::new(
                confidence.unwrap_or(cfg.detection.confidence_threshold),
                1,
            );
            let source = StillImageSource::open(&image)?;
            let frame = source_frame(source)?;
            let (result, annotated) = orchestrator.process_frame_annotated(&frame, &config)?;
            if let Some(path) = output {
                std::fs::write(&path, encode_jpeg(&annotated)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                log::info!("annotated frame written to {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Cleanup => {}
    }
    Ok(())
}

fn source_frame(mut source: StillImageSource) -> Result<image::RgbImage> {
    use drivewatch::{FrameSource, SourceItem};
    match source.next_frame()? {
        Some(SourceItem::Frame(frame)) => Ok(frame.image),
        _ => Err(anyhow::anyhow!("image produced no frame")),
    }
}
