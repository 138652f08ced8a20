//! Track descriptors and the source resolver that produces them.
//!
//! A [`Track`] is immutable once loaded. Local tracks point at an ephemeral
//! `blob:glasswave/<n>` handle owned by the [`ResourceRegistry`]; whoever
//! evicts the track from its last queue must call [`release_track`] exactly
//! once.

pub mod loader;
pub mod metadata;
pub mod resources;
pub mod url;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use loader::{NoProbe, ProbeOutcome, RemoteProbe, TrackLoader};
pub use resources::{LocalResource, ResourceRegistry, ResourceStats};

/// Opaque track identifier, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TrackId(u64);

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

impl TrackId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Where a track's audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    /// Local file behind a resource handle that must be released
    Local,
    /// Normalized remote URL
    Remote,
}

/// A playable audio item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: TrackId,
    /// Always present: falls back to the file stem or last URL segment
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
    /// Resource handle (local) or normalized absolute URL (remote)
    pub url: String,
    /// Seconds; `None` when unknown or for continuous streams
    pub duration: Option<f64>,
    pub mime: Option<String>,
    /// No fixed end: HLS playlist or unknown remote duration
    pub is_stream: bool,
    pub source: TrackSource,
    pub play_count: u32,
    pub added_at: DateTime<Utc>,
}

impl Track {
    /// Build a remote track with only the required fields set.
    pub fn remote(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: TrackId::next(),
            title: title.into(),
            artist: None,
            album: None,
            artwork_url: None,
            url: url.into(),
            duration: None,
            mime: None,
            is_stream: true,
            source: TrackSource::Remote,
            play_count: 0,
            added_at: Utc::now(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.source == TrackSource::Local
    }

    /// "Artist - Title", or just the title.
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) if !artist.is_empty() => format!("{} - {}", artist, self.title),
            _ => self.title.clone(),
        }
    }

    /// Duration formatted as `m:ss`, or `--:--` when unknown.
    pub fn duration_label(&self) -> String {
        match self.duration {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                let total = secs.round() as u64;
                format!("{}:{:02}", total / 60, total % 60)
            }
            _ => "--:--".to_string(),
        }
    }
}

/// Release every local handle owned by a track.
///
/// Remote URLs are left alone. Artwork handles are released for both kinds,
/// since embedded art is always registered locally.
pub fn release_track(resources: &ResourceRegistry, track: &Track) {
    if track.is_local() {
        resources.release(&track.url);
    }
    if let Some(artwork) = &track.artwork_url
        && ResourceRegistry::is_handle(artwork)
    {
        resources.release(artwork);
    }
}
