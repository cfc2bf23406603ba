//! Job-level failure with a stable reason code.

use std::fmt;

pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
pub const SOURCE_OPEN_FAILED: &str = "SOURCE_OPEN_FAILED";
pub const SOURCE_READ_FAILED: &str = "SOURCE_READ_FAILED";
pub const SINK_OPEN_FAILED: &str = "SINK_OPEN_FAILED";
pub const SINK_WRITE_FAILED: &str = "SINK_WRITE_FAILED";
pub const JOB_CANCELLED: &str = "JOB_CANCELLED";

/// A job failed as a whole. Never accompanied by partial statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap an internal error, keeping its whole context chain in the message.
    pub fn from_anyhow(code: &'static str, err: &anyhow::Error) -> Self {
        Self::new(code, format!("{:#}", err))
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(INVALID_CONFIG, message)
    }

    pub fn cancelled(frames_read: u64) -> Self {
        Self::new(
            JOB_CANCELLED,
            format!("job cancelled after {} frames", frames_read),
        )
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for JobError {}
