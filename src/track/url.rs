//! URL normalization and the scheme allow-list.
//!
//! Allowed sources:
//! - `https:` anywhere
//! - `blob:` (local resource handles)
//! - `http:` only for loopback hosts (`localhost`, `127.0.0.0/8`, `::1`)

use reqwest::Url;
use std::net::IpAddr;

use crate::error::{Error, Result};

/// MIME type reported for HLS playlists.
pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

/// Normalize user input into an absolute, allowed URL.
///
/// - `//host/p` becomes `https://host/p`
/// - `example.com/song.mp3` becomes `https://example.com/song.mp3`
/// - `host:port/p` is treated as a host, not a scheme
pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_url("empty URL"));
    }

    let candidate = if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate)
        .map_err(|e| Error::invalid_url(format!("{trimmed}: {e}")))?;
    check_allowed(&url)?;
    Ok(url.to_string())
}

/// Check an already-absolute URL against the allow-list without rewriting it.
pub fn check_source(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| Error::invalid_url(format!("{url}: {e}")))?;
    check_allowed(&parsed)
}

fn check_allowed(url: &Url) -> Result<()> {
    match url.scheme() {
        "https" | "blob" => Ok(()),
        "http" if url.host_str().is_some_and(is_loopback_host) => Ok(()),
        "http" => Err(Error::invalid_url(format!(
            "{url}: plain http is only allowed for loopback hosts"
        ))),
        scheme => Err(Error::invalid_url(format!(
            "{url}: scheme '{scheme}' is not allowed"
        ))),
    }
}

/// Whether the input starts with an RFC 3986 scheme.
///
/// A prefix containing a dot, or one followed by a port number, is a host.
fn has_scheme(input: &str) -> bool {
    let Some(colon) = input.find(':') else {
        return false;
    };
    let prefix = &input[..colon];
    let mut chars = prefix.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    if !valid || prefix.contains('.') {
        return false;
    }
    !input[colon + 1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
}

/// `localhost`, any `127.0.0.0/8` address, or `::1`.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Path component with query and fragment stripped, lowercased.
fn path_lower(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    }
}

/// HLS playlists are detected by their `.m3u8` path suffix.
pub fn is_hls(url: &str) -> bool {
    path_lower(url).ends_with(".m3u8")
}

/// Best-effort MIME type for a file extension (without dot).
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "wav" => "audio/wav",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        "m3u8" => HLS_MIME,
        _ => return None,
    };
    Some(mime)
}

/// Best-effort MIME type from a URL's path extension.
pub fn guess_mime(url: &str) -> Option<&'static str> {
    let path = path_lower(url);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    mime_for_extension(ext)
}

/// Display title for a URL: last path segment, percent-decoded, without
/// its extension. Falls back to the host, then to the URL itself.
pub fn title_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        });

    match segment {
        Some(name) => match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name,
        },
        None => parsed
            .host_str()
            .map(|h| h.to_string())
            .unwrap_or_else(|| url.to_string()),
    }
}
