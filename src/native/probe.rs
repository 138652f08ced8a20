//! Remote duration/MIME discovery over HTTP.
//!
//! A HEAD request supplies the content type; a ranged GET of the first
//! megabyte is handed to lofty for the duration. A prefix of a longer file is
//! only trusted when the container header states its length. Every failure
//! degrades to an empty outcome, and the loader bounds the whole probe with
//! a timeout.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE};
use tracing::debug;

use crate::track::metadata::duration_from_prefix;
use crate::track::{ProbeOutcome, RemoteProbe};

/// Bytes fetched for duration sniffing.
pub const PROBE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }

    async fn content_type(&self, url: &str) -> Option<String> {
        let response = self.client.head(url).send().await.ok()?;
        if !response.status().is_success() {
            debug!(url, status = %response.status(), "HEAD rejected");
            return None;
        }
        response
            .headers()
            .get(CONTENT_TYPE)?
            .to_str()
            .ok()
            .and_then(mime_essence)
    }

    /// First [`PROBE_BYTES`] of the body, plus the full length when known.
    async fn leading_bytes(&self, url: &str) -> Option<(Vec<u8>, Option<u64>)> {
        let mut response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", PROBE_BYTES - 1))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(url, status = %response.status(), "Ranged GET rejected");
            return None;
        }

        let mut total = if response.status() == StatusCode::PARTIAL_CONTENT {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total)
        } else {
            response.content_length()
        };

        // Servers that ignore Range send the whole body; stop after the cap.
        let mut data = Vec::new();
        while data.len() < PROBE_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => data.extend_from_slice(&chunk),
                Ok(None) => {
                    if total.is_none() && response.status() == StatusCode::OK {
                        total = Some(data.len() as u64);
                    }
                    break;
                }
                Err(e) => {
                    debug!(url, error = %e, "Probe body read failed");
                    break;
                }
            }
        }
        data.truncate(PROBE_BYTES);
        Some((data, total))
    }
}

#[async_trait]
impl RemoteProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let mime = self.content_type(url).await;
        let duration = match self.leading_bytes(url).await {
            Some((bytes, total)) => duration_from_prefix(&bytes, total),
            None => None,
        };
        debug!(url, ?mime, ?duration, "Probed remote source");
        ProbeOutcome { duration, mime }
    }
}

/// `audio/mpeg; charset=binary` -> `audio/mpeg`. Empty types are dropped.
fn mime_essence(value: &str) -> Option<String> {
    let essence = value.split(';').next()?.trim().to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

/// `bytes 0-1048575/5242880` -> 5242880. An unknown length (`*`) is `None`.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
