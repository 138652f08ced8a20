//! Real-time audio context: the output side of the processing graph.

use async_trait::async_trait;
use crossbeam_channel::Receiver;

use super::graph::GraphHandle;
use crate::error::{Error, Result};

/// A block of interleaved samples produced by the media element, already
/// converted to the context's sample rate and channel count.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Media time of the first frame, in seconds
    pub position: f64,
}

/// Head of the graph: where the media element delivers decoded audio.
#[derive(Debug)]
pub struct SourceNode {
    pub chunks: Receiver<AudioChunk>,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// An output context rendering a [`GraphHandle`].
#[async_trait(?Send)]
pub trait AudioContext {
    fn state(&self) -> ContextState;

    async fn resume(&mut self) -> Result<()>;

    async fn suspend(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Attach the graph head. Replaces any previous source.
    fn connect_source(&mut self, source: SourceNode) -> Result<()>;

    fn disconnect_source(&mut self) -> Result<()>;

    fn supports_sink_selection(&self) -> bool {
        false
    }

    /// Route output to another sink.
    async fn set_sink_id(&mut self, _sink_id: &str) -> Result<()> {
        Err(Error::SinkUnsupported)
    }
}

/// Creates contexts on demand. The engine calls it at most once per
/// lifetime, on first use.
pub trait ContextFactory {
    fn create(&self, graph: GraphHandle, sink_id: Option<&str>) -> Result<Box<dyn AudioContext>>;

    fn supports_sink_selection(&self) -> bool {
        false
    }
}
