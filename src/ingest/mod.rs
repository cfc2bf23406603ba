//! Frame sources.
//!
//! - Local video files (`video-ffmpeg` feature, plus `stub://` synthetic paths)
//! - Single still images (file or in-memory upload)
//! - Synthetic frames (testing)
//!
//! The upload layer validates and stores inputs before they reach a source;
//! sources only decode. All produce RGB `Frame`s.

#[cfg(feature = "video-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod file;
pub mod still;
pub mod synthetic;

pub use file::VideoFileSource;
pub use still::{decode_image, encode_jpeg, StillImageSource};
pub use synthetic::{synthetic_frame_index, SyntheticConfig, SyntheticSource};
