//! Audio output using cpal.
//!
//! The output callback:
//! - pulls decoded chunks from the connected source node
//! - runs the processing graph (EQ, limiter, master gain, analyser tap)
//! - converts to the device sample format
//!
//! The stream is built paused; `resume` starts it, `suspend` pauses it and
//! `close` drops it.

use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::engine::{AudioChunk, AudioContext, ContextFactory, ContextState, GraphHandle, SourceNode};
use crate::error::{Error, Result};
use crate::output::DEFAULT_SINK;

/// Receiver the callback reads from; swapped on connect/disconnect.
type InputSlot = Arc<Mutex<Option<Receiver<AudioChunk>>>>;

/// Resolve a sink id to a cpal device. `None` and `"default"` pick the host default.
pub fn find_device(host: &cpal::Host, sink_id: Option<&str>) -> Result<Device> {
    match sink_id {
        None | Some(DEFAULT_SINK) => host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable(DEFAULT_SINK.to_string())),
        Some(id) => host
            .output_devices()
            .map_err(|e| Error::context_failure(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(id))
            .ok_or_else(|| Error::DeviceUnavailable(id.to_string())),
    }
}

/// Opens cpal output streams on the default host.
#[derive(Debug, Default)]
pub struct CpalContextFactory;

impl CpalContextFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ContextFactory for CpalContextFactory {
    fn create(&self, graph: GraphHandle, sink_id: Option<&str>) -> Result<Box<dyn AudioContext>> {
        let host = cpal::default_host();
        let device = find_device(&host, sink_id)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| Error::context_failure(e.to_string()))?;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = supported.sample_format();
        info!(
            device = %device_name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?format,
            "Opening audio output"
        );

        let input: InputSlot = Arc::new(Mutex::new(None));
        let stream = open_stream(&device, &config, format, &input, &graph)?;

        Ok(Box::new(CpalContext {
            graph,
            input,
            config,
            format,
            stream: Some(stream),
            state: ContextState::Suspended,
        }))
    }

    fn supports_sink_selection(&self) -> bool {
        true
    }
}

pub struct CpalContext {
    graph: GraphHandle,
    input: InputSlot,
    config: StreamConfig,
    format: SampleFormat,
    stream: Option<Stream>,
    state: ContextState,
}

#[async_trait(?Send)]
impl AudioContext for CpalContext {
    fn state(&self) -> ContextState {
        self.state
    }

    async fn resume(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(Error::context_failure("context is closed"));
        };
        stream
            .play()
            .map_err(|e| Error::context_failure(e.to_string()))?;
        self.state = ContextState::Running;
        Ok(())
    }

    async fn suspend(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(Error::context_failure("context is closed"));
        };
        stream
            .pause()
            .map_err(|e| Error::context_failure(e.to_string()))?;
        self.state = ContextState::Suspended;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream = None;
        self.input.lock().take();
        self.state = ContextState::Closed;
        debug!("Audio output closed");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn connect_source(&mut self, source: SourceNode) -> Result<()> {
        if source.sample_rate != self.sample_rate() || source.channels != self.channels() {
            return Err(Error::context_failure(format!(
                "source node is {} Hz x{}, output is {} Hz x{}",
                source.sample_rate,
                source.channels,
                self.sample_rate(),
                self.channels()
            )));
        }
        *self.input.lock() = Some(source.chunks);
        Ok(())
    }

    fn disconnect_source(&mut self) -> Result<()> {
        match self.input.lock().take() {
            Some(_) => Ok(()),
            None => Err(Error::context_failure("no source connected")),
        }
    }

    fn supports_sink_selection(&self) -> bool {
        true
    }

    /// Rebuild the stream on another device with the same format.
    async fn set_sink_id(&mut self, sink_id: &str) -> Result<()> {
        if self.state == ContextState::Closed {
            return Err(Error::context_failure("context is closed"));
        }
        let host = cpal::default_host();
        let device = find_device(&host, Some(sink_id))?;
        let stream = open_stream(&device, &self.config, self.format, &self.input, &self.graph)
            .map_err(|e| {
                warn!(error = %e, sink_id, "Output device rejected the stream format");
                Error::DeviceUnavailable(sink_id.to_string())
            })?;
        if self.state == ContextState::Running {
            stream
                .play()
                .map_err(|e| Error::context_failure(e.to_string()))?;
        }
        self.stream = Some(stream);
        info!(sink_id, "Output device switched");
        Ok(())
    }
}

fn open_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    input: &InputSlot,
    graph: &GraphHandle,
) -> Result<Stream> {
    let input = Arc::clone(input);
    let graph = Arc::clone(graph);
    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(device, config, input, graph),
        SampleFormat::I16 => build_stream::<i16>(device, config, input, graph),
        SampleFormat::U16 => build_stream::<u16>(device, config, input, graph),
        SampleFormat::I32 => build_stream::<i32>(device, config, input, graph),
        other => {
            return Err(Error::context_failure(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    }
    .map_err(|e| Error::context_failure(e.to_string()))?;

    // Streams may start on build; the context starts suspended.
    stream
        .pause()
        .map_err(|e| Error::context_failure(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    input: InputSlot,
    graph: GraphHandle,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut pending: Option<(AudioChunk, usize)> = None;
    let mut scratch: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.clear();
            scratch.resize(data.len(), 0.0);
            {
                let slot = input.lock();
                match slot.as_ref() {
                    Some(rx) => {
                        fill_from(&mut scratch, &mut pending, rx);
                    }
                    None => pending = None,
                }
            }
            graph.lock().process(&mut scratch);
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = T::from_sample(*sample);
            }
        },
        |err| {
            error!("Audio stream error: {}", err);
        },
        None,
    )
}

/// Copy queued chunks into `buffer`, leaving silence on underrun.
///
/// Returns the number of samples written. A partially consumed chunk is kept
/// in `pending` for the next callback.
fn fill_from(
    buffer: &mut [f32],
    pending: &mut Option<(AudioChunk, usize)>,
    rx: &Receiver<AudioChunk>,
) -> usize {
    let mut written = 0;
    while written < buffer.len() {
        if pending.is_none() {
            match rx.try_recv() {
                Ok(chunk) => *pending = Some((chunk, 0)),
                Err(_) => break,
            }
        }
        let Some((chunk, offset)) = pending.as_mut() else {
            break;
        };

        let available = chunk.samples.len() - *offset;
        let count = available.min(buffer.len() - written);
        buffer[written..written + count]
            .copy_from_slice(&chunk.samples[*offset..*offset + count]);
        *offset += count;
        written += count;

        if *offset >= chunk.samples.len() {
            *pending = None;
        }
    }
    written
}
