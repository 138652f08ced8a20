//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\glasswave\config.toml
//! - macOS: ~/Library/Application Support/glasswave/config.toml
//! - Linux: ~/.config/glasswave/config.toml
//!
//! Only playback-core settings live here. Queue contents and UI settings
//! belong to the UI state layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::RepeatMode;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio engine settings
    pub audio: AudioConfig,

    /// Queue navigation settings
    pub playback: PlaybackConfig,

    /// Track loading settings
    pub loader: LoaderConfig,
}

/// Audio engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Initial volume level (0.0 - 1.0)
    pub volume: f32,

    /// Start muted
    pub muted: bool,

    /// Initial playback rate (0.25 - 4.0)
    pub playback_rate: f64,

    /// Insert the peak limiter before the master gain
    pub limiter_enabled: bool,

    /// Insert the equalizer at the head of the chain
    pub eq_enabled: bool,

    /// Per-band equalizer gains in dB (missing bands stay flat)
    pub eq_gains_db: Vec<f32>,

    /// Analyser FFT size (power of two)
    pub fft_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            limiter_enabled: true,
            eq_enabled: false,
            eq_gains_db: Vec::new(),
            fft_size: 2048,
        }
    }
}

/// Queue navigation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Whether shuffle starts enabled
    pub shuffle: bool,

    /// Default repeat mode
    pub repeat: RepeatMode,

    /// Advance automatically when a track ends or fails to load
    pub autoplay_next: bool,

    /// Seconds after which "previous" restarts the current track
    pub restart_threshold_secs: f64,

    /// Consecutive load failures tolerated before autoplay gives up
    pub max_consecutive_failures: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: RepeatMode::Off,
            autoplay_next: true,
            restart_threshold_secs: 2.0,
            max_consecutive_failures: 3,
        }
    }
}

/// Longest accepted restart threshold. Anything above it (including `inf`)
/// is clamped.
const MAX_RESTART_THRESHOLD_SECS: f64 = 3600.0;

impl PlaybackConfig {
    pub fn restart_threshold(&self) -> Duration {
        let secs = if self.restart_threshold_secs.is_nan() {
            PlaybackConfig::default().restart_threshold_secs
        } else {
            self.restart_threshold_secs.clamp(0.0, MAX_RESTART_THRESHOLD_SECS)
        };
        Duration::from_secs_f64(secs)
    }
}

/// Track loading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Upper bound for embedded metadata extraction (milliseconds)
    pub metadata_timeout_ms: u64,

    /// Upper bound for remote duration probing (milliseconds)
    pub probe_timeout_ms: u64,

    /// File extensions accepted as audio (case-insensitive, without dot)
    pub extensions: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: 4000,
            probe_timeout_ms: 6500,
            extensions: ["mp3", "flac", "ogg", "oga", "opus", "wav", "m4a", "aac", "webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LoaderConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("glasswave"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &dir.join("config.toml"))
}

/// Save configuration to an explicit path.
pub fn save_to(config: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
