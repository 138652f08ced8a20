//! Desktop backend for the playback core.
//!
//! - [`DecoderMedia`]: symphonia decoding on a worker thread
//! - [`CpalContextFactory`]: cpal output running the processing graph
//! - [`CpalDevices`]: output enumeration
//! - [`HttpProbe`]: remote duration/MIME discovery
//!
//! There is no native HLS handler; playlists fall through to the decoder and
//! fail with a format error.

pub mod decoder;
pub mod devices;
pub mod media;
pub mod output;
pub mod probe;
mod resampler;

pub use decoder::AudioDecoder;
pub use devices::CpalDevices;
pub use media::DecoderMedia;
pub use output::{CpalContext, CpalContextFactory};
pub use probe::HttpProbe;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::AudioConfig;
use crate::engine::{AudioEngine, ParametricEq};
use crate::error::Result;
use crate::events::EventBus;
use crate::track::ResourceRegistry;

/// Assemble an engine on the default audio host.
pub fn engine(
    runtime: Handle,
    resources: Arc<ResourceRegistry>,
    events: EventBus,
    config: &AudioConfig,
) -> Result<AudioEngine> {
    let media = DecoderMedia::new(runtime, resources)?;
    Ok(AudioEngine::new(
        Box::new(media),
        Box::new(CpalContextFactory::new()),
        events,
    )
    .with_equalizer(Box::new(ParametricEq::default()))
    .with_config(config))
}
