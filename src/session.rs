//! Running tally for a realtime camera session.
//!
//! Single-frame processing is stateless; a client that wants cumulative
//! statistics across frames owns a `CameraSession` and feeds it results.

use std::time::Instant;

use crate::detect::{ClassTable, FrameResult};
use crate::stats::{StatsAggregator, VideoStatistics};

#[derive(Debug, Clone)]
pub struct CameraSession {
    classes: ClassTable,
    stats: StatsAggregator,
    frames: u64,
    started: Instant,
}

impl CameraSession {
    pub fn new(classes: ClassTable) -> Self {
        let stats = StatsAggregator::new(&classes);
        Self {
            classes,
            stats,
            frames: 0,
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, result: &FrameResult) {
        self.stats.record(&result.detections);
        self.frames += 1;
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames
    }

    /// Statistics so far; duration is wall-clock time since the session began.
    pub fn summary(&self) -> VideoStatistics {
        self.stats.summarize(self.started.elapsed().as_secs_f64())
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.classes.clone());
    }
}
