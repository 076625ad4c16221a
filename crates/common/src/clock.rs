//! Clock and timing utilities for recordings.
//!
//! Encoded streams are timed by frame index, not by wall clock, so
//! timestamps stay strictly increasing no matter how irregularly frames
//! arrive. The wall clock is only used for naming output files and for
//! reporting how long a session ran.

use std::path::{Path, PathBuf};
use std::time::Instant;

/// Microseconds per second, the unit used for presentation timestamps.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// A recording clock that measures elapsed time since a session started.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get seconds elapsed since recording start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Presentation timestamp in microseconds for the `frame_index`-th frame.
///
/// Returns 0 when `fps` is 0.
pub fn presentation_time_us(frame_index: u64, fps: u32) -> u64 {
    if fps == 0 {
        return 0;
    }
    frame_index * MICROS_PER_SEC / fps as u64
}

/// Timestamped file name such as `Vizcast_20260101_120000_123.mp4`.
pub fn timestamped_file_name(prefix: &str, extension: &str) -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
    format!("{prefix}_{stamp}.{extension}")
}

/// First path in `dir` named `file_name` that does not exist yet.
///
/// `clip.mp4` becomes `clip-1.mp4`, `clip-2.mp4`, ... when taken.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{stem}-{n}.{ext}")),
            None => dir.join(format!("{stem}-{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RecordingClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_presentation_time() {
        assert_eq!(presentation_time_us(0, 20), 0);
        assert_eq!(presentation_time_us(1, 20), 50_000);
        assert_eq!(presentation_time_us(3, 30), 100_000);
        assert_eq!(presentation_time_us(7, 0), 0);
    }

    #[test]
    fn test_timestamped_file_name_shape() {
        let name = timestamped_file_name("Vizcast", "mp4");
        assert!(name.starts_with("Vizcast_"));
        assert!(name.ends_with(".mp4"));
        // Vizcast_ + YYYYmmdd_HHMMSS_mmm + .mp4
        assert_eq!(name.len(), "Vizcast_".len() + 19 + ".mp4".len());
    }

    #[test]
    fn test_unique_path_appends_suffix() {
        let dir = std::env::temp_dir().join("vizcast_test_unique_path");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        assert_eq!(unique_path(&dir, "clip.y4m"), dir.join("clip.y4m"));
        std::fs::write(dir.join("clip.y4m"), b"x").unwrap();
        assert_eq!(unique_path(&dir, "clip.y4m"), dir.join("clip-1.y4m"));
        std::fs::write(dir.join("clip-1.y4m"), b"x").unwrap();
        assert_eq!(unique_path(&dir, "clip.y4m"), dir.join("clip-2.y4m"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
