use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use drivewatch::detect::{RawDetection, StubBackend};
use drivewatch::error::{INVALID_CONFIG, JOB_CANCELLED, SINK_OPEN_FAILED};
use drivewatch::ingest::{synthetic_frame_index, SyntheticConfig, SyntheticSource};
use drivewatch::{
    Annotator, BBox, ClassTable, Detection, DetectionConfig, Detector, FrameSource, MemorySink,
    Orchestrator, VideoInfo, VideoSink,
};

/// One Phone box on frames `lo..=hi` of a synthetic source.
fn phone_detector(lo: u64, hi: u64) -> (Detector, Arc<AtomicU64>) {
    let backend = StubBackend::new(ClassTable::behaviors()).with_fn(move |image| {
        let index = synthetic_frame_index(image).ok_or_else(|| anyhow!("not a synthetic frame"))?;
        if (lo..=hi).contains(&index) {
            Ok(vec![RawDetection::new(
                1,
                0.9,
                BBox::new(100.0, 100.0, 200.0, 220.0),
            )])
        } else {
            Ok(Vec::new())
        }
    });
    let invocations = backend.invocations();
    let detector = Detector::new(backend).expect("stub backend loads");
    (detector, invocations)
}

fn ten_second_clip() -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        width: 320,
        height: 240,
        fps: 30.0,
        frame_count: 300,
    })
}

#[test]
fn phone_in_frames_50_to_100_every_frame() -> Result<()> {
    let (detector, invocations) = phone_detector(50, 100);
    let orchestrator = Orchestrator::new(detector);
    let report = orchestrator.process(
        &mut ten_second_clip(),
        &DetectionConfig::new(0.25, 1),
        None,
        None,
    )?;
    let stats = &report.statistics;

    assert_eq!(invocations.load(Ordering::SeqCst), 300);
    assert_eq!(stats.count("Phone"), 51);
    assert_eq!(stats.count("Smoke"), 0);
    assert_eq!(stats.count("Drink"), 0);
    assert_eq!(stats.total, 51);
    assert_eq!(stats.percentage("Phone"), 100.0);
    assert_eq!(stats.percentage("Smoke"), 0.0);
    assert!((stats.video_duration_seconds - 10.0).abs() < 1e-6);
    assert_eq!(stats.durations["Phone"], 1.7);
    assert_eq!(report.frames.len(), 300);
    Ok(())
}

#[test]
fn frame_skip_five_runs_sixty_inferences() -> Result<()> {
    let (detector, invocations) = phone_detector(50, 100);
    let orchestrator = Orchestrator::new(detector);
    let mut sink = MemorySink::new();
    let report = orchestrator.process(
        &mut ten_second_clip(),
        &DetectionConfig::new(0.25, 5),
        Some(&mut sink),
        None,
    )?;

    assert_eq!(invocations.load(Ordering::SeqCst), 60);
    assert_eq!(report.processed_frames, 60);
    // 50, 55, ..., 100
    assert_eq!(report.statistics.count("Phone"), 11);
    assert_eq!(report.statistics.total, 11);
    assert!((report.statistics.video_duration_seconds - 10.0).abs() < 1e-6);

    assert_eq!(sink.frames_written(), 300);
    assert!(sink.is_finished());
    let info = sink.info().expect("sink opened");
    assert_eq!((info.width, info.height, info.fps), (320, 240, 30.0));
    for (i, frame) in sink.frames().iter().enumerate() {
        assert_eq!(synthetic_frame_index(frame), Some(i as u64));
    }
    let box_color = ClassTable::behaviors().color(1);
    assert_eq!(*sink.frames()[55].get_pixel(100, 150), box_color);
    // Inside the Phone range but skipped: passed through untouched.
    assert_ne!(*sink.frames()[56].get_pixel(100, 150), box_color);
    Ok(())
}

#[test]
fn skip_larger_than_video_processes_first_frame_only() -> Result<()> {
    let (detector, invocations) = phone_detector(1, 3);
    let orchestrator = Orchestrator::new(detector);
    let mut source = SyntheticSource::new(SyntheticConfig {
        width: 32,
        height: 32,
        fps: 10.0,
        frame_count: 4,
    });
    let report = orchestrator.process(&mut source, &DetectionConfig::new(0.25, 10), None, None)?;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(report.statistics.total, 0);
    assert!(report.statistics.percentages.values().all(|p| *p == 0.0));
    Ok(())
}

#[test]
fn empty_source_yields_zero_statistics() -> Result<()> {
    let (detector, invocations) = phone_detector(0, 0);
    let orchestrator = Orchestrator::new(detector);
    let mut source = SyntheticSource::new(SyntheticConfig {
        frame_count: 0,
        ..SyntheticConfig::default()
    });
    let mut sink = MemorySink::new();
    let report = orchestrator.process(&mut source, &DetectionConfig::default(), Some(&mut sink), None)?;
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(report.statistics.total, 0);
    assert_eq!(report.statistics.counts.len(), 3);
    assert_eq!(report.statistics.video_duration_seconds, 0.0);
    assert_eq!(sink.frames_written(), 0);
    Ok(())
}

#[test]
fn corrupt_frames_count_as_empty_and_keep_output_length() -> Result<()> {
    let (detector, invocations) = phone_detector(0, 9);
    let orchestrator = Orchestrator::new(detector);
    let mut source = SyntheticSource::new(SyntheticConfig {
        width: 320,
        height: 240,
        fps: 10.0,
        frame_count: 10,
    })
    .with_corrupt_frames([0, 4, 5]);
    let mut sink = MemorySink::new();
    let report = orchestrator.process(&mut source, &DetectionConfig::default(), Some(&mut sink), None)?;

    assert_eq!(invocations.load(Ordering::SeqCst), 7);
    assert_eq!(report.statistics.count("Phone"), 7);
    assert_eq!(report.processed_frames, 10);
    assert!(report.frames[4].detections.is_empty());
    // Frame 0 had nothing to repeat and is written black; 4 and 5 repeat frame 3.
    assert_eq!(sink.frames_written(), 10);
    assert!(sink.frames()[0].pixels().all(|p| *p == Rgb([0, 0, 0])));
    assert_eq!(sink.frames()[0].dimensions(), (320, 240));
    assert_eq!(synthetic_frame_index(&sink.frames()[1]), Some(1));
    assert_eq!(sink.frames()[4].as_raw(), sink.frames()[3].as_raw());
    assert_eq!(sink.frames()[5].as_raw(), sink.frames()[3].as_raw());
    assert_eq!(synthetic_frame_index(&sink.frames()[6]), Some(6));
    Ok(())
}

#[test]
fn failing_inference_does_not_abort_the_job() -> Result<()> {
    let backend = StubBackend::new(ClassTable::behaviors()).with_fn(|image| {
        match synthetic_frame_index(image) {
            Some(3) => Err(anyhow!("malformed tensor")),
            _ => Ok(vec![RawDetection::new(0, 0.6, BBox::new(1.0, 1.0, 8.0, 8.0))]),
        }
    });
    let orchestrator = Orchestrator::new(Detector::new(backend)?);
    let mut source = SyntheticSource::new(SyntheticConfig {
        width: 16,
        height: 16,
        fps: 5.0,
        frame_count: 5,
    });
    let report = orchestrator.process(&mut source, &DetectionConfig::default(), None, None)?;
    assert_eq!(report.statistics.count("Smoke"), 4);
    assert!(report.frames[3].detections.is_empty());
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> Result<()> {
    let (detector, invocations) = phone_detector(0, 0);
    let orchestrator = Orchestrator::new(detector);
    for config in [DetectionConfig::new(0.25, 0), DetectionConfig::new(1.01, 1)] {
        let err = orchestrator
            .process(&mut ten_second_clip(), &config, None, None)
            .unwrap_err();
        assert_eq!(err.code, INVALID_CONFIG);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn cancellation_fails_the_job() -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let backend = StubBackend::new(ClassTable::behaviors()).with_fn(move |image| {
        if synthetic_frame_index(image) == Some(20) {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(Vec::new())
    });
    let orchestrator = Orchestrator::new(Detector::new(backend)?);
    let err = orchestrator
        .process(
            &mut ten_second_clip(),
            &DetectionConfig::default(),
            None,
            Some(cancel.as_ref()),
        )
        .unwrap_err();
    assert_eq!(err.code, JOB_CANCELLED);
    Ok(())
}

struct BrokenSink;

impl VideoSink for BrokenSink {
    fn open(&mut self, _info: &VideoInfo) -> Result<()> {
        Err(anyhow!("unsupported codec"))
    }

    fn write(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        0
    }
}

#[test]
fn sink_open_failure_fails_before_inference() -> Result<()> {
    let (detector, invocations) = phone_detector(0, 300);
    let orchestrator = Orchestrator::new(detector);
    let mut sink = BrokenSink;
    let err = orchestrator
        .process(
            &mut ten_second_clip(),
            &DetectionConfig::default(),
            Some(&mut sink),
            None,
        )
        .unwrap_err();
    assert_eq!(err.code, SINK_OPEN_FAILED);
    assert!(err.message.contains("unsupported codec"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn concurrent_jobs_share_one_detector() -> Result<()> {
    let (detector, invocations) = phone_detector(50, 100);
    let orchestrator = Orchestrator::new(detector);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            thread::spawn(move || {
                orchestrator
                    .process(&mut ten_second_clip(), &DetectionConfig::default(), None, None)
                    .map(|report| report.statistics)
            })
        })
        .collect();

    for handle in handles {
        let stats = handle.join().expect("job thread")?;
        assert_eq!(stats.count("Phone"), 51);
        assert_eq!(stats.total, 51);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 4 * 300);
    Ok(())
}

#[test]
fn still_frame_without_detections() -> Result<()> {
    let orchestrator = Orchestrator::new(Detector::new(StubBackend::default())?);
    let frame = RgbImage::from_pixel(64, 48, Rgb([30, 60, 90]));
    let result = orchestrator.process_frame(&frame, &DetectionConfig::default())?;
    assert!(result.detections.is_empty());
    assert_eq!(result.frame_index, 0);
    Ok(())
}

#[test]
fn edge_box_annotation_stays_in_bounds() {
    let frame = RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]));
    let detection = Detection {
        class_id: 2,
        class_name: "Drink".to_string(),
        confidence: 0.5,
        bbox: BBox::new(0.0, 0.0, 64.0, 48.0),
    };
    let classes = ClassTable::behaviors();
    let color = classes.color(2);
    let out = Annotator::new(classes).draw(&frame, &[detection]);
    assert_eq!(out.dimensions(), (64, 48));
    assert_eq!(*out.get_pixel(63, 47), color);
    assert_eq!(*out.get_pixel(0, 47), color);
}

#[test]
fn still_source_is_one_frame() -> Result<()> {
    let mut source = drivewatch::ingest::StillImageSource::new(RgbImage::new(8, 8));
    assert!(source.next_frame()?.is_some());
    assert!(source.next_frame()?.is_none());
    Ok(())
}
