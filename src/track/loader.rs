//! Turns a local path or a URL into a [`Track`].
//!
//! Metadata extraction and remote duration probing are best-effort: both run
//! behind a timeout and degrade to "unknown" instead of failing the load.

use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::metadata::{self, EmbeddedMetadata};
use super::resources::ResourceRegistry;
use super::url::{self as urls, HLS_MIME};
use super::{Track, TrackId, TrackSource, release_track};
use crate::config::LoaderConfig;
use crate::error::{Error, Result, ResultExt};

/// What a remote probe learned about a URL. Both fields may be unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOutcome {
    pub duration: Option<f64>,
    pub mime: Option<String>,
}

/// Best-effort remote duration/MIME discovery.
///
/// Implementations must not fail: anything that goes wrong is "unknown".
#[async_trait]
pub trait RemoteProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Probe that never learns anything. Every non-HLS URL becomes a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl RemoteProbe for NoProbe {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        ProbeOutcome::default()
    }
}

/// Resolves user input into playable tracks.
pub struct TrackLoader {
    resources: Arc<ResourceRegistry>,
    probe: Arc<dyn RemoteProbe>,
    config: LoaderConfig,
}

impl TrackLoader {
    pub fn new(
        resources: Arc<ResourceRegistry>,
        probe: Arc<dyn RemoteProbe>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            resources,
            probe,
            config,
        }
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Load anything: an existing path or `file://` URL is loaded as a local
    /// file, everything else is treated as a remote URL.
    pub async fn load(&self, input: &str) -> Result<Track> {
        let trimmed = input.trim();
        if let Some(path) = file_url_path(trimmed) {
            return self.load_file(&path).await;
        }
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            let probe_path = path.clone();
            let exists = tokio::task::spawn_blocking(move || probe_path.exists())
                .await
                .unwrap_or(false);
            if exists {
                return self.load_file(&path).await;
            }
        }
        self.load_url(trimmed).await
    }

    /// Load a local file.
    ///
    /// Fails with `UnsupportedFormat` before any handle is created when the
    /// file is neither on the extension allow-list nor sniffed as audio.
    pub async fn load_file(&self, path: &Path) -> Result<Track> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let allowed = self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext));
        let sniffed = self.inspect_file(path, allowed).await?;

        let url = self.resources.register_file(path);
        let embedded = self.read_metadata(path).await.unwrap_or_default();

        let artwork_url = embedded
            .artwork
            .map(|art| self.resources.register_bytes(art.data, art.mime_type));

        let title = embedded.title.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string())
        });

        let mime = embedded
            .mime
            .or(sniffed)
            .or_else(|| urls::mime_for_extension(&ext))
            .map(str::to_string);

        let track = Track {
            id: TrackId::next(),
            title,
            artist: embedded.artist,
            album: embedded.album,
            artwork_url,
            url,
            duration: embedded.duration,
            mime,
            is_stream: false,
            source: TrackSource::Local,
            play_count: 0,
            added_at: Utc::now(),
        };
        info!(id = %track.id, path = %path.display(), "Loaded local track");
        Ok(track)
    }

    /// Stat the file and, unless its extension is allow-listed, sniff its
    /// content. Runs on a blocking task bounded by the metadata timeout.
    async fn inspect_file(&self, path: &Path, allowed: bool) -> Result<Option<&'static str>> {
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || -> Result<Option<&'static str>> {
            let meta = std::fs::metadata(&owned)
                .with_context(format!("Failed to read {}", owned.display()))?;
            if !meta.is_file() {
                return Err(Error::unsupported(format!("{} is not a file", owned.display())));
            }
            if allowed {
                return Ok(None);
            }
            match metadata::sniff(&owned) {
                Some(mime) => Ok(Some(mime)),
                None => Err(Error::unsupported(owned.display().to_string())),
            }
        });
        let failure = match tokio::time::timeout(self.config.metadata_timeout(), task).await {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => io::Error::other(e),
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "file inspection timed out"),
        };
        Err(Error::Io(failure).context(format!("Failed to inspect {}", path.display())))
    }

    async fn read_metadata(&self, path: &Path) -> Option<EmbeddedMetadata> {
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || metadata::read(&owned));
        match tokio::time::timeout(self.config.metadata_timeout(), task).await {
            Ok(Ok(Ok(embedded))) => Some(embedded),
            Ok(Ok(Err(e))) => {
                debug!(path = %path.display(), error = %e, "Metadata unavailable, using file name");
                None
            }
            Ok(Err(e)) => {
                debug!(path = %path.display(), error = %e, "Metadata task failed");
                None
            }
            Err(_) => {
                debug!(path = %path.display(), "Metadata read timed out");
                None
            }
        }
    }

    /// Load a remote URL.
    ///
    /// HLS playlists skip the probe and are always streams. Other URLs are
    /// probed with an upper bound; an unknown duration makes the track a
    /// stream.
    pub async fn load_url(&self, input: &str) -> Result<Track> {
        let url = urls::normalize_url(input)?;
        let title = urls::title_from_url(&url);

        let (duration, mime) = if urls::is_hls(&url) {
            (None, Some(HLS_MIME.to_string()))
        } else {
            let outcome =
                match tokio::time::timeout(self.config.probe_timeout(), self.probe.probe(&url)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!(url = %url, "Duration probe timed out");
                        ProbeOutcome::default()
                    }
                };
            let mime = outcome
                .mime
                .or_else(|| urls::guess_mime(&url).map(str::to_string));
            (outcome.duration, mime)
        };

        let track = Track {
            id: TrackId::next(),
            title,
            artist: None,
            album: None,
            artwork_url: None,
            is_stream: duration.is_none(),
            url,
            duration,
            mime,
            source: TrackSource::Remote,
            play_count: 0,
            added_at: Utc::now(),
        };
        info!(id = %track.id, url = %track.url, stream = track.is_stream, "Loaded remote track");
        Ok(track)
    }

    /// Release the handles owned by a track. Call once per evicted track.
    pub fn release(&self, track: &Track) {
        release_track(&self.resources, track);
    }
}

fn file_url_path(input: &str) -> Option<PathBuf> {
    if !input.get(..7)?.eq_ignore_ascii_case("file://") {
        return None;
    }
    reqwest::Url::parse(input).ok()?.to_file_path().ok()
}
