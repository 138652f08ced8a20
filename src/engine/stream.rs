//! Adaptive-streaming handler hook (HLS).

use async_trait::async_trait;

use super::media::MediaElement;
use crate::error::Result;
use crate::track::url::is_hls;

/// Optional strategy for playlist-based streams.
///
/// The engine destroys the session before every new load, so an
/// implementation only ever has one live attachment.
#[async_trait(?Send)]
pub trait StreamHandler {
    fn can_handle(&self, url: &str) -> bool {
        is_hls(url)
    }

    /// Start a session feeding `media`. An error makes the engine fall back
    /// to native playback of the same URL.
    async fn attach(&mut self, url: &str, media: &mut dyn MediaElement) -> Result<()>;

    fn destroy(&mut self);
}
