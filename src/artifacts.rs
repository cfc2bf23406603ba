//! Ephemeral upload and output storage.
//!
//! Uploads land in `upload_dir` under a random job id; annotated videos go to
//! `output_dir`. Nothing here is durable: `cleanup_older_than` removes stale
//! files from both directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use rand::RngCore;

use crate::config::ArtifactSettings;

pub const ALLOWED_VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Random 16-hex-digit job identifier.
pub fn new_job_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(upload_dir: P, output_dir: Q) -> Result<Self> {
        let store = Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        };
        for dir in [&store.upload_dir, &store.output_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(store)
    }

    pub fn from_settings(settings: &ArtifactSettings) -> Result<Self> {
        Self::new(&settings.upload_dir, &settings.output_dir)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist an uploaded video under a fresh job id.
    pub fn store_upload(&self, bytes: &[u8], original_name: &str) -> Result<PathBuf> {
        let ext = allowed_extension(original_name).ok_or_else(|| {
            anyhow!(
                "unsupported upload '{}': expected one of {}",
                original_name,
                ALLOWED_VIDEO_EXTENSIONS.join(", ")
            )
        })?;
        if bytes.is_empty() {
            return Err(anyhow!("upload '{}' is empty", original_name));
        }
        let stem = sanitize_stem(original_name);
        let path = self
            .upload_dir
            .join(format!("{}_{}.{}", new_job_id(), stem, ext));
        fs::write(&path, bytes)
            .with_context(|| format!("failed to store upload {}", path.display()))?;
        log::info!("stored upload {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Where the annotated rendition of `upload` is written.
    pub fn output_path_for(&self, upload: &Path) -> PathBuf {
        let stem = upload
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        self.output_dir.join(format!("annotated_{}.mp4", stem))
    }

    /// Delete regular files in both directories last modified more than
    /// `max_age` ago. Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for dir in [&self.upload_dir, &self.output_dir] {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to list {}", dir.display()))
                }
            };
            for entry in entries {
                let entry = entry?;
                let meta = entry.metadata()?;
                if !meta.is_file() {
                    continue;
                }
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .unwrap_or_default();
                if age > max_age {
                    match fs::remove_file(entry.path()) {
                        Ok(()) => removed += 1,
                        Err(e) => log::warn!("failed to remove {}: {}", entry.path().display(), e),
                    }
                }
            }
        }
        if removed > 0 {
            log::info!("artifact cleanup removed {} files", removed);
        }
        Ok(removed)
    }
}

fn allowed_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_VIDEO_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

fn sanitize_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique_hex() {
        let a = new_job_id();
        let b = new_job_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert_eq!(allowed_extension("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(allowed_extension("a.b.mkv").as_deref(), Some("mkv"));
        assert!(allowed_extension("notes.txt").is_none());
        assert!(allowed_extension("noext").is_none());
    }

    #[test]
    fn stems_are_sanitized() {
        assert_eq!(sanitize_stem("../../etc/pass wd.mp4"), "pass_wd");
        assert_eq!(sanitize_stem(".mp4"), "_mp4");
    }
}
