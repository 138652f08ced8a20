//! The playable-media primitive the engine drives.

use async_trait::async_trait;

use super::context::SourceNode;
use crate::error::MediaError;
use crate::events::PlayerEvent;

/// Timeline notifications from a media element, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Play,
    Pause,
    Ended,
    TimeUpdate(f64),
    DurationChange(Option<f64>),
    LoadedMetadata(Option<f64>),
    Error(MediaError),
}

impl From<MediaEvent> for PlayerEvent {
    fn from(event: MediaEvent) -> Self {
        match event {
            MediaEvent::Play => PlayerEvent::Play,
            MediaEvent::Pause => PlayerEvent::Pause,
            MediaEvent::Ended => PlayerEvent::Ended,
            MediaEvent::TimeUpdate(current_time) => PlayerEvent::TimeUpdate { current_time },
            MediaEvent::DurationChange(duration) => PlayerEvent::DurationChange { duration },
            MediaEvent::LoadedMetadata(duration) => PlayerEvent::LoadedMetadata { duration },
            MediaEvent::Error(error) => PlayerEvent::Error { error },
        }
    }
}

/// A single media element: one source at a time, native transport.
///
/// Once a source node has been created, audio is delivered through it and
/// element-level volume no longer scales the samples; the graph's master
/// gain does.
#[async_trait(?Send)]
pub trait MediaElement {
    /// Replace the current source. `None` releases it.
    fn set_source(&mut self, url: Option<&str>);

    fn source(&self) -> Option<String>;

    /// Start or resume playback. Rejections (autoplay blocks, no source)
    /// come back as errors; the engine turns them into events.
    async fn play(&mut self) -> Result<(), MediaError>;

    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, seconds: f64);

    /// `None` while unknown and for continuous streams.
    fn duration(&self) -> Option<f64>;

    fn set_playback_rate(&mut self, rate: f64);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);

    /// Create the graph head at the given output format. Called once.
    fn create_source_node(&mut self, sample_rate: u32, channels: u16) -> Option<SourceNode>;

    fn drain_events(&mut self) -> Vec<MediaEvent>;
}
