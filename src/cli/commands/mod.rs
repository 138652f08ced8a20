//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `play`: queue inputs and run the playback loop
//! - `devices`: list output devices
//! - `probe`: resolve one input and print the track descriptor
//! - `config`: print (and optionally save) the effective settings

mod devices;
mod play;
mod probe;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::controller::RepeatMode;
use crate::prefs::{FilePreferences, MemoryPreferences, PreferenceStore};
use crate::track::url::{HLS_MIME, mime_for_extension};

pub use devices::cmd_devices;
pub use play::{PlayOptions, cmd_play};
pub use probe::cmd_probe;

/// glasswave: a small queue-driven audio player
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Read settings from this file instead of the default location
    #[arg(long, global = true, env = "GLASSWAVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Play files, directories and URLs in order
    Play {
        /// Files, directories (scanned recursively) or URLs
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Shuffle the queue
        #[arg(long)]
        shuffle: bool,
        /// Repeat mode
        #[arg(long, value_enum)]
        repeat: Option<RepeatMode>,
        /// Volume (0.0 - 1.0)
        #[arg(long)]
        volume: Option<f32>,
        /// Output device id (see `glasswave devices`)
        #[arg(long)]
        device: Option<String>,
        /// Stop after the first track instead of advancing
        #[arg(long)]
        no_autoplay: bool,
    },
    /// List output devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Resolve a file or URL and print what the player would queue
    Probe {
        /// File path or URL
        input: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the effective settings as TOML
    Config {
        /// Also write them to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = load_config(cli.config.as_deref());

    match &cli.command {
        Commands::Play {
            inputs,
            shuffle,
            repeat,
            volume,
            device,
            no_autoplay,
        } => {
            let options = PlayOptions {
                shuffle: *shuffle,
                repeat: *repeat,
                volume: *volume,
                device: device.clone(),
                autoplay_next: !*no_autoplay,
            };
            cmd_play(&rt, config, inputs, &options)
        }
        Commands::Devices { json } => cmd_devices(&rt, *json),
        Commands::Probe { input, json } => cmd_probe(&rt, &config, input, *json),
        Commands::Config { save } => cmd_config(&config, cli.config.as_deref(), *save),
    }
}

fn cmd_config(config: &Config, path: Option<&Path>, save: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if save {
        match path {
            Some(path) => config::save_to(config, path)?,
            None => config::save(config)?,
        }
    }
    Ok(())
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Config from an explicit file, or the default location. Never fails.
fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return config::load();
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
            tracing::error!("Failed to parse config file {:?}: {}", path, e);
            Config::default()
        }),
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// File-backed preferences, or in-memory ones when there is no config dir.
pub(crate) fn open_preferences() -> Arc<dyn PreferenceStore> {
    match FilePreferences::default_location() {
        Some(prefs) => Arc::new(prefs),
        None => {
            tracing::warn!("No config directory, preferences will not persist");
            Arc::new(MemoryPreferences::new())
        }
    }
}

/// Expand directories into their audio files (recursive, sorted); pass
/// everything else through untouched.
pub(crate) fn expand_inputs(inputs: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if !path.is_dir() {
            expanded.push(input.clone());
            continue;
        }
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_audio_file(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();
        expanded.extend(files.into_iter().map(|p| p.to_string_lossy().into_owned()));
    }
    expanded
}

/// Check if a path has an audio file extension (playlists excluded)
pub(crate) fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .and_then(mime_for_extension)
        .is_some_and(|mime| mime != HLS_MIME)
}
