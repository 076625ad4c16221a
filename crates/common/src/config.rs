//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Synthesis backend selection.
    pub backend: BackendSettings,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Where recordings, snapshots, and scratch files live.
    pub storage: StorageConfig,

    /// Frame dispatch pacing.
    pub dispatch: DispatchSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Persisted backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Free-form selection string, e.g. "On-device", "Accelerated (GPU)",
    /// "Remote API", "Hybrid". Matched case-insensitively.
    pub selection: String,

    /// Endpoint for the remote backend (e.g. "http://10.0.0.2:8000/reenact").
    pub remote_endpoint: String,

    /// Request timeout for the remote backend.
    pub remote_timeout_ms: u64,

    /// Model file used by the accelerated on-device backend.
    pub model_path: PathBuf,

    /// Weight of the reference frame in the lightweight blend [0.0, 1.0].
    pub blend_weight: f32,
}

/// Default recording parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Encoded width in pixels (must be even).
    pub width: u32,

    /// Encoded height in pixels (must be even).
    pub height: u32,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// Frames per second used for presentation timestamps.
    pub fps: u32,

    /// Encoder selection: "auto", "software", or "gstreamer".
    pub encoder: String,
}

/// Storage locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Finalized recordings land here.
    pub recordings_dir: PathBuf,

    /// Still snapshots land here.
    pub snapshots_dir: PathBuf,

    /// Containers are written here while a recording is in progress.
    pub scratch_dir: PathBuf,
}

/// Dispatcher pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Delay between task completion and slot release.
    pub cooldown_ms: u64,

    /// Upper bound on one backend call.
    pub timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "vizcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            selection: "On-device".to_string(),
            remote_endpoint: String::new(),
            remote_timeout_ms: 3000,
            model_path: PathBuf::from("models/renderer.model"),
            blend_weight: 0.5,
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            bitrate: 2_000_000,
            fps: 20,
            encoder: "auto".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data = data_base_dir().join("vizcast");
        Self {
            recordings_dir: data.join("recordings"),
            snapshots_dir: data.join("snapshots"),
            scratch_dir: std::env::temp_dir().join("vizcast"),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 16,
            timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("vizcast").join("config.json")
}

fn data_base_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recorder_expectations() {
        let config = AppConfig::default();
        assert_eq!(config.recording.width, 640);
        assert_eq!(config.recording.height, 480);
        assert_eq!(config.recording.bitrate, 2_000_000);
        assert_eq!(config.recording.fps, 20);
        assert_eq!(config.dispatch.cooldown_ms, 16);
        assert_eq!(config.backend.selection, "On-device");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "backend": { "selection": "Hybrid" } }"#).unwrap();
        assert_eq!(config.backend.selection, "Hybrid");
        assert_eq!(config.backend.remote_timeout_ms, 3000);
        assert_eq!(config.recording.fps, 20);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join("vizcast_test_config");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.json");

        let mut config = AppConfig::default();
        config.backend.remote_endpoint = "http://127.0.0.1:9000/reenact".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.backend, config.backend);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unparsable_config_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("vizcast_test_bad_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.recording, RecordingDefaults::default());

        std::fs::remove_dir_all(&dir).ok();
    }
}
