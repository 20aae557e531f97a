use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub mapping: MappingConfig,
    pub stack: StackConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields keep
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Master volume in `[0, 1]`.
    pub volume: f32,
    /// Instrument selected at startup.
    pub instrument: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            volume: 0.7,
            instrument: "piano".to_string(),
        }
    }
}

/// Timing knobs for stack playback and single-drawing playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Divides every entry's duration.
    pub speed: f64,
    pub progress_interval_ms: u64,
    pub crossfade_ms: u64,
    /// Seconds allotted when the live drawing is played on its own.
    pub drawing_duration: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            progress_interval_ms: 16,
            crossfade_ms: 150,
            drawing_duration: 3.0,
        }
    }
}

impl PlaybackConfig {
    pub fn progress_interval(&self) -> f64 {
        self.progress_interval_ms.max(1) as f64 / 1000.0
    }

    pub fn crossfade(&self) -> f64 {
        self.crossfade_ms as f64 / 1000.0
    }
}

/// Parameters of the point-to-note grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Maximum horizontal gap, in canvas units, between points of one run.
    pub proximity: f32,
    /// Shortest note the mapper will schedule, in seconds.
    pub min_note_duration: f64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            proximity: 10.0,
            min_note_duration: 0.1,
        }
    }
}

/// Stack defaults and where the stack is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub default_duration: f64,
    /// Directory of the key-value store. `None` leaves the choice to the front
    /// end.
    pub storage_dir: Option<PathBuf>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            default_duration: 3.0,
            storage_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "audio": { "instrument": "flute" } }"#).unwrap();

        assert_eq!(config.audio.instrument, "flute");
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.playback.crossfade_ms, 150);
        assert_eq!(config.mapping.proximity, 10.0);
        assert!(config.stack.storage_dir.is_none());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "playback": { "speed": 2.0 } }"#).unwrap();

        let config = AppConfig::load_or_default(Some(path.as_path())).unwrap();
        assert_eq!(config.playback.speed, 2.0);
        assert!((config.playback.progress_interval() - 0.016).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(&dir.path().join("nope.json")).is_err());
    }
}
