//! Embedded tag and property reading via lofty.
//!
//! Everything here is synchronous and may touch the disk; the loader runs it
//! on a blocking task behind a timeout.

use anyhow::{Context, Result};
use lofty::file::{AudioFile, FileType, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

/// Embedded front cover (or first picture).
#[derive(Debug, Clone, PartialEq)]
pub struct Artwork {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Tags and properties read from an audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Seconds, when the container reports a non-zero duration
    pub duration: Option<f64>,
    pub mime: Option<&'static str>,
    pub artwork: Option<Artwork>,
}

/// Read tags, duration, and front cover from a file.
pub fn read(path: &Path) -> Result<EmbeddedMetadata> {
    let tagged_file = Probe::open(path)
        .context("Failed to open file for probing")?
        .read()
        .context("Failed to read file metadata")?;

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let artwork = tag.and_then(|t| {
        let pictures = t.pictures();
        let picture = pictures
            .iter()
            .find(|p| p.pic_type() == lofty::picture::PictureType::CoverFront)
            .or_else(|| pictures.first())?;

        let mime_type = match picture.mime_type() {
            Some(lofty::picture::MimeType::Jpeg) => "image/jpeg",
            Some(lofty::picture::MimeType::Png) => "image/png",
            Some(lofty::picture::MimeType::Gif) => "image/gif",
            Some(lofty::picture::MimeType::Bmp) => "image/bmp",
            Some(lofty::picture::MimeType::Tiff) => "image/tiff",
            _ => "image/jpeg",
        };

        Some(Artwork {
            data: picture.data().to_vec(),
            mime_type: mime_type.to_string(),
        })
    });

    Ok(EmbeddedMetadata {
        title: tag.and_then(|t| non_empty(t.title())),
        artist: tag.and_then(|t| non_empty(t.artist())),
        album: tag.and_then(|t| non_empty(t.album())),
        duration: positive_secs(tagged_file.properties().duration()),
        mime: mime_for_file_type(tagged_file.file_type()),
        artwork,
    })
}

/// Identify audio by content, ignoring the extension.
///
/// Returns the MIME type of the detected container, or `None` when the
/// content is not recognised as audio.
pub fn sniff(path: &Path) -> Option<&'static str> {
    let probe = Probe::open(path).ok()?.guess_file_type().ok()?;
    mime_for_file_type(probe.file_type()?)
}

/// Duration of a (possibly truncated) in-memory file, if lofty can tell.
pub fn duration_from_bytes(bytes: &[u8]) -> Option<f64> {
    let tagged_file = Probe::new(Cursor::new(bytes))
        .guess_file_type()
        .ok()?
        .read()
        .ok()?;
    positive_secs(tagged_file.properties().duration())
}

/// Duration from the leading `bytes` of a file that is `total_len` long.
///
/// A complete file is read as-is. A truncated prefix is only trusted for
/// containers whose header states the total length; for the rest (MPEG,
/// Ogg, ADTS) the answer would be scaled to the prefix, so it is unknown.
pub fn duration_from_prefix(bytes: &[u8], total_len: Option<u64>) -> Option<f64> {
    if total_len.is_some_and(|total| bytes.len() as u64 >= total) {
        return duration_from_bytes(bytes);
    }
    let probe = Probe::new(Cursor::new(bytes)).guess_file_type().ok()?;
    let header_states_length = matches!(
        probe.file_type()?,
        FileType::Wav | FileType::Flac | FileType::Mp4 | FileType::Aiff
    );
    if !header_states_length {
        return None;
    }
    positive_secs(probe.read().ok()?.properties().duration())
}

fn non_empty(value: Option<Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive_secs(duration: std::time::Duration) -> Option<f64> {
    let secs = duration.as_secs_f64();
    (secs > 0.0).then_some(secs)
}

fn mime_for_file_type(file_type: FileType) -> Option<&'static str> {
    let mime = match file_type {
        FileType::Mpeg => "audio/mpeg",
        FileType::Flac => "audio/flac",
        FileType::Vorbis | FileType::Speex => "audio/ogg",
        FileType::Opus => "audio/opus",
        FileType::Wav => "audio/wav",
        FileType::Mp4 => "audio/mp4",
        FileType::Aac => "audio/aac",
        FileType::Aiff => "audio/aiff",
        _ => return None,
    };
    Some(mime)
}
