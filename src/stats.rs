//! Per-job detection statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::{ClassTable, Detection};

/// Final (or running) statistics for one job or session.
///
/// `total == counts.values().sum()` always holds. Percentages are rounded to
/// one decimal and are all zero when nothing was detected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStatistics {
    pub counts: BTreeMap<String, u64>,
    pub percentages: BTreeMap<String, f64>,
    pub total: u64,
    pub video_duration_seconds: f64,
    /// Seconds of video in which each class was seen.
    pub durations: BTreeMap<String, f64>,
}

impl VideoStatistics {
    pub fn count(&self, class_name: &str) -> u64 {
        self.counts.get(class_name).copied().unwrap_or(0)
    }

    pub fn percentage(&self, class_name: &str) -> f64 {
        self.percentages.get(class_name).copied().unwrap_or(0.0)
    }
}

/// Accumulates detections frame by frame. Owned by exactly one job.
#[derive(Clone, Debug)]
pub struct StatsAggregator {
    counts: BTreeMap<String, u64>,
    frames_seen: BTreeMap<String, u64>,
    total: u64,
    frame_interval_seconds: f64,
}

impl StatsAggregator {
    /// Start with every class of `classes` at zero.
    pub fn new(classes: &ClassTable) -> Self {
        let counts: BTreeMap<String, u64> =
            classes.names().map(|name| (name.to_string(), 0)).collect();
        let frames_seen = counts.clone();
        Self {
            counts,
            frames_seen,
            total: 0,
            frame_interval_seconds: 0.0,
        }
    }

    /// Video time represented by one recorded frame (`frame_skip / fps`).
    pub fn with_frame_interval(mut self, seconds: f64) -> Self {
        self.frame_interval_seconds = if seconds.is_finite() && seconds > 0.0 {
            seconds
        } else {
            0.0
        };
        self
    }

    /// Record the detections of one processed frame.
    pub fn record(&mut self, detections: &[Detection]) {
        for detection in detections {
            *self.counts.entry(detection.class_name.clone()).or_insert(0) += 1;
        }
        self.total += detections.len() as u64;

        let mut present: Vec<&str> = detections.iter().map(|d| d.class_name.as_str()).collect();
        present.sort_unstable();
        present.dedup();
        for name in present {
            *self.frames_seen.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Compute percentages and durations from the current tallies.
    /// Does not consume or change the aggregator.
    pub fn summarize(&self, duration_seconds: f64) -> VideoStatistics {
        let percentages = self
            .counts
            .iter()
            .map(|(name, count)| {
                let pct = if self.total > 0 {
                    round_to(100.0 * *count as f64 / self.total as f64, 1)
                } else {
                    0.0
                };
                (name.clone(), pct)
            })
            .collect();

        let durations = self
            .frames_seen
            .iter()
            .map(|(name, frames)| {
                (
                    name.clone(),
                    round_to(*frames as f64 * self.frame_interval_seconds, 2),
                )
            })
            .collect();

        VideoStatistics {
            counts: self.counts.clone(),
            percentages,
            total: self.total,
            video_duration_seconds: if duration_seconds.is_finite() {
                duration_seconds.max(0.0)
            } else {
                0.0
            },
            durations,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    fn det(class_id: u32, name: &str) -> Detection {
        Detection {
            class_id,
            class_name: name.to_string(),
            confidence: 0.9,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn empty_job_has_all_classes_at_zero() {
        let stats = StatsAggregator::new(&ClassTable::behaviors()).summarize(0.0);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.counts.len(), 3);
        assert!(stats.counts.values().all(|c| *c == 0));
        assert!(stats.percentages.values().all(|p| *p == 0.0));
        assert!(stats.durations.values().all(|d| *d == 0.0));
    }

    #[test]
    fn total_matches_sum_of_counts() {
        let mut agg = StatsAggregator::new(&ClassTable::behaviors());
        agg.record(&[det(0, "Smoke"), det(1, "Phone")]);
        agg.record(&[]);
        agg.record(&[det(1, "Phone"), det(1, "Phone"), det(2, "Drink")]);
        let stats = agg.summarize(3.0);
        assert_eq!(stats.total, stats.counts.values().sum::<u64>());
        assert_eq!(stats.count("Phone"), 3);
        assert_eq!(stats.percentage("Phone"), 60.0);
        assert_eq!(stats.percentage("Smoke"), 20.0);
    }

    #[test]
    fn percentages_round_to_one_decimal() {
        let mut agg = StatsAggregator::new(&ClassTable::behaviors());
        agg.record(&[det(0, "Smoke"), det(1, "Phone"), det(2, "Drink")]);
        let stats = agg.summarize(1.0);
        assert_eq!(stats.percentage("Smoke"), 33.3);
        let sum: f64 = stats.percentages.values().sum();
        assert!((sum - 100.0).abs() < 0.5);
    }

    #[test]
    fn summarize_is_idempotent() {
        let mut agg = StatsAggregator::new(&ClassTable::behaviors());
        agg.record(&[det(2, "Drink")]);
        assert_eq!(agg.summarize(4.5), agg.summarize(4.5));
    }

    #[test]
    fn durations_count_frames_not_detections() {
        let mut agg =
            StatsAggregator::new(&ClassTable::behaviors()).with_frame_interval(5.0 / 30.0);
        agg.record(&[det(1, "Phone"), det(1, "Phone")]);
        agg.record(&[det(1, "Phone")]);
        let stats = agg.summarize(10.0);
        assert_eq!(stats.durations["Phone"], 0.33);
        assert_eq!(stats.durations["Smoke"], 0.0);
    }

    #[test]
    fn unknown_class_names_are_added() {
        let mut agg = StatsAggregator::new(&ClassTable::behaviors());
        agg.record(&[det(3, "Driver")]);
        let stats = agg.summarize(1.0);
        assert_eq!(stats.count("Driver"), 1);
        assert_eq!(stats.percentage("Driver"), 100.0);
    }
}
