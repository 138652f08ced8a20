//! Error types for the playback core.
//!
//! Library modules return [`Error`] via the [`Result`] alias, while the CLI
//! uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: errors that unwind a call (bad input, unsupported format)
//! - [`MediaError`]: playback failures; these never unwind, they travel on
//!   the `error` event so the UI can classify them
//!
//! # Example
//!
//! ```ignore
//! use glasswave::error::{Error, Result};
//!
//! fn resolve(input: &str) -> Result<String> {
//!     let url = normalize_url(input)?; // InvalidUrl surfaces here
//!     Ok(url)
//! }
//! ```

use std::fmt;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the playback core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Local file is not a recognised audio type
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Empty, unparseable or disallowed URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Underlying playback failure
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Requested output sink is not present
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The audio backend cannot route to a specific sink
    #[error("Output sink selection is not supported")]
    SinkUnsupported,

    /// Audio context creation or state transition failed
    #[error("Audio context error: {0}")]
    Context(String),

    /// Configuration or preference storage error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an unsupported-format error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat(message.into())
    }

    /// Create an invalid-URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl(message.into())
    }

    /// Create an audio context error.
    pub fn context_failure(message: impl Into<String>) -> Self {
        Self::Context(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

/// Classification of a playback failure, used by the UI to pick a message
/// and by the controller to decide whether to skip ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    /// Playback was blocked until a user gesture
    Autoplay,
    /// Fetching the resource failed
    Network,
    /// The resource was fetched but could not be decoded
    Decode,
    /// The container/codec is not supported
    Format,
    /// The URL was rejected before any media activity
    InvalidSource,
    /// A pending operation was superseded (e.g. a new load)
    Aborted,
    Unknown,
}

impl MediaErrorKind {
    /// Whether this failure means the current track cannot be played at all.
    ///
    /// Autoplay blocks and aborts are transient and must not advance the queue.
    pub fn is_load_failure(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Decode | Self::Format | Self::InvalidSource
        )
    }
}

impl fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Autoplay => "autoplay blocked",
            Self::Network => "network error",
            Self::Decode => "decode error",
            Self::Format => "unsupported media",
            Self::InvalidSource => "invalid source",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// A playback failure with its original cause attached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize)]
#[error("{kind}: {message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Network, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Decode, message)
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Format, message)
    }

    pub fn autoplay(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Autoplay, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Aborted, message)
    }
}
