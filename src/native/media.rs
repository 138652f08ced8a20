//! `MediaElement` backed by a symphonia decoder thread.
//!
//! The element itself only records intent and forwards commands; a worker
//! thread owns the decoder and pushes resampled chunks into the source node.
//! Remote sources are fetched by a task on the host runtime; a newer
//! `set_source` aborts it. Every event is stamped with the source generation
//! it belongs to, so notifications from a replaced source never surface
//! after `set_source`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_channel::{
    Receiver, SendTimeoutError, Sender, TryRecvError, bounded, select, unbounded,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, info, warn};

use super::decoder::AudioDecoder;
use super::resampler::{Resampler, map_channels};
use crate::engine::{AudioChunk, MediaElement, MediaEvent, SourceNode};
use crate::error::{MediaError, MediaErrorKind, Result};
use crate::track::{LocalResource, ResourceRegistry};

const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(250);
const SOURCE_NODE_DEPTH: usize = 8;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// What the worker should open.
#[derive(Debug, Clone)]
enum MediaInput {
    File(PathBuf),
    Bytes { data: Arc<Vec<u8>>, mime: String },
    Remote(String),
    /// A handle that no longer resolves
    Missing(String),
}

enum Command {
    Load {
        generation: u64,
        input: Option<MediaInput>,
    },
    Play,
    Pause,
    Seek(f64),
    Rate(f64),
    Connect {
        chunks: Sender<AudioChunk>,
        sample_rate: u32,
        channels: u16,
    },
    Shutdown,
}

/// Body of a finished remote fetch.
struct Fetched {
    generation: u64,
    url: String,
    result: std::result::Result<Vec<u8>, MediaError>,
}

/// Remote fetch in flight for the current generation.
struct Download {
    generation: u64,
    task: TaskHandle<()>,
    /// `Play` arrived before the body did
    play: bool,
    seek: Option<f64>,
}

/// Playhead state published by the worker.
#[derive(Debug, Default)]
struct Timeline {
    generation: u64,
    current_time: f64,
    duration: Option<f64>,
}

pub struct DecoderMedia {
    resources: Arc<ResourceRegistry>,
    commands: Sender<Command>,
    events: Receiver<(u64, MediaEvent)>,
    timeline: Arc<Mutex<Timeline>>,
    generation: u64,
    source: Option<String>,
    paused: bool,
    volume: f32,
    muted: bool,
    worker: Option<JoinHandle<()>>,
}

impl DecoderMedia {
    /// Spawn the decoder worker. Remote sources are fetched on `runtime`.
    pub fn new(runtime: Handle, resources: Arc<ResourceRegistry>) -> Result<Self> {
        let (commands, command_rx) = unbounded();
        let (event_tx, events) = unbounded();
        let timeline = Arc::new(Mutex::new(Timeline::default()));

        let worker = Worker::new(runtime, event_tx, Arc::clone(&timeline));
        let handle = thread::Builder::new()
            .name("glasswave-decoder".to_string())
            .spawn(move || worker.run(command_rx))?;

        Ok(Self {
            resources,
            commands,
            events,
            timeline,
            generation: 0,
            source: None,
            paused: true,
            volume: 1.0,
            muted: false,
            worker: Some(handle),
        })
    }

    /// Last volume set on the element. Audible level is the graph's master gain.
    pub fn volume(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }

    fn resolve(&self, url: &str) -> MediaInput {
        if !ResourceRegistry::is_handle(url) {
            return MediaInput::Remote(url.to_string());
        }
        match self.resources.resolve(url) {
            Some(LocalResource::File(path)) => MediaInput::File(path),
            Some(LocalResource::Bytes { data, mime }) => MediaInput::Bytes { data, mime },
            None => MediaInput::Missing(url.to_string()),
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Decoder worker is gone");
        }
    }
}

impl Drop for DecoderMedia {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Decoder worker panicked");
        }
    }
}

#[async_trait(?Send)]
impl MediaElement for DecoderMedia {
    fn set_source(&mut self, url: Option<&str>) {
        self.generation += 1;
        self.paused = true;
        self.source = url.map(str::to_string);
        {
            let mut timeline = self.timeline.lock();
            timeline.generation = self.generation;
            timeline.current_time = 0.0;
            timeline.duration = None;
        }
        let input = url.map(|u| self.resolve(u));
        self.send(Command::Load {
            generation: self.generation,
            input,
        });
    }

    fn source(&self) -> Option<String> {
        self.source.clone()
    }

    async fn play(&mut self) -> std::result::Result<(), MediaError> {
        if self.source.is_none() {
            return Err(MediaError::new(
                MediaErrorKind::InvalidSource,
                "no source loaded",
            ));
        }
        self.paused = false;
        self.send(Command::Play);
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
        self.send(Command::Pause);
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_time(&self) -> f64 {
        let timeline = self.timeline.lock();
        if timeline.generation == self.generation {
            timeline.current_time
        } else {
            0.0
        }
    }

    fn set_current_time(&mut self, seconds: f64) {
        {
            let mut timeline = self.timeline.lock();
            if timeline.generation == self.generation {
                timeline.current_time = seconds;
            }
        }
        self.send(Command::Seek(seconds));
    }

    fn duration(&self) -> Option<f64> {
        let timeline = self.timeline.lock();
        (timeline.generation == self.generation)
            .then_some(timeline.duration)
            .flatten()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.send(Command::Rate(rate));
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn create_source_node(&mut self, sample_rate: u32, channels: u16) -> Option<SourceNode> {
        let (chunks, rx) = bounded(SOURCE_NODE_DEPTH);
        self.send(Command::Connect {
            chunks,
            sample_rate,
            channels,
        });
        Some(SourceNode {
            chunks: rx,
            sample_rate,
            channels,
        })
    }

    fn drain_events(&mut self) -> Vec<MediaEvent> {
        let current = self.generation;
        let events: Vec<MediaEvent> = self
            .events
            .try_iter()
            .filter(|(generation, _)| *generation == current)
            .map(|(_, event)| event)
            .collect();
        if events
            .iter()
            .any(|e| matches!(e, MediaEvent::Ended | MediaEvent::Error(_)))
        {
            self.paused = true;
        }
        events
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Output {
    chunks: Sender<AudioChunk>,
    sample_rate: u32,
    channels: u16,
}

struct Worker {
    runtime: Handle,
    http: Option<reqwest::Client>,
    download: Option<Download>,
    fetched_tx: Sender<Fetched>,
    fetched_rx: Receiver<Fetched>,
    events: Sender<(u64, MediaEvent)>,
    timeline: Arc<Mutex<Timeline>>,
    generation: u64,
    decoder: Option<AudioDecoder>,
    resampler: Option<Resampler>,
    output: Option<Output>,
    /// Chunk the source node had no room for yet
    backlog: Option<AudioChunk>,
    playing: bool,
    ended: bool,
    rate: f64,
    last_time_update: Option<Instant>,
}

impl Worker {
    fn new(runtime: Handle, events: Sender<(u64, MediaEvent)>, timeline: Arc<Mutex<Timeline>>) -> Self {
        let (fetched_tx, fetched_rx) = unbounded();
        Self {
            runtime,
            http: None,
            download: None,
            fetched_tx,
            fetched_rx,
            events,
            timeline,
            generation: 0,
            decoder: None,
            resampler: None,
            output: None,
            backlog: None,
            playing: false,
            ended: false,
            rate: 1.0,
            last_time_update: None,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        let fetched = self.fetched_rx.clone();
        loop {
            // Block on commands and fetches when idle, poll when producing audio
            let keep_going = if self.is_active() {
                let keep_going = match commands.try_recv() {
                    Ok(command) => self.handle(command),
                    Err(TryRecvError::Empty) => true,
                    Err(TryRecvError::Disconnected) => false,
                };
                if let Ok(body) = fetched.try_recv() {
                    self.on_fetched(body);
                }
                keep_going
            } else {
                select! {
                    recv(commands) -> command => match command {
                        Ok(command) => self.handle(command),
                        Err(_) => false,
                    },
                    recv(fetched) -> body => {
                        if let Ok(body) = body {
                            self.on_fetched(body);
                        }
                        true
                    }
                }
            };
            if !keep_going {
                break;
            }

            if self.is_active() {
                self.pump();
            }
        }
        self.cancel_download();
        debug!("Decoder worker stopped");
    }

    fn is_active(&self) -> bool {
        self.playing && self.decoder.is_some() && self.output.is_some()
    }

    fn emit(&self, event: MediaEvent) {
        let _ = self.events.send((self.generation, event));
    }

    /// Returns false on shutdown.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Load { generation, input } => self.load(generation, input),
            Command::Play => match self.download.as_mut() {
                Some(download) => download.play = true,
                None => self.play(),
            },
            Command::Pause => {
                if let Some(download) = self.download.as_mut() {
                    download.play = false;
                }
                if self.playing {
                    self.playing = false;
                    self.emit(MediaEvent::Pause);
                }
            }
            Command::Seek(seconds) => match self.download.as_mut() {
                Some(download) => download.seek = Some(seconds),
                None => self.seek(seconds),
            },
            Command::Rate(rate) => {
                self.rate = rate;
                self.resampler = None;
            }
            Command::Connect {
                chunks,
                sample_rate,
                channels,
            } => {
                self.output = Some(Output {
                    chunks,
                    sample_rate,
                    channels,
                });
                self.resampler = None;
                self.backlog = None;
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn load(&mut self, generation: u64, input: Option<MediaInput>) {
        self.cancel_download();
        self.generation = generation;
        self.decoder = None;
        self.resampler = None;
        self.backlog = None;
        self.playing = false;
        self.ended = false;
        self.last_time_update = None;

        let opened = match input {
            None => return,
            Some(MediaInput::Remote(url)) => match self.start_download(url) {
                Ok(()) => return,
                Err(e) => Err(e),
            },
            Some(MediaInput::File(path)) => AudioDecoder::open(&path),
            Some(MediaInput::Bytes { data, mime }) => {
                AudioDecoder::from_bytes(data.as_ref().clone(), Some(&mime), None)
            }
            Some(MediaInput::Missing(handle)) => Err(MediaError::new(
                MediaErrorKind::InvalidSource,
                format!("{handle} has been released"),
            )),
        };
        self.opened(opened);
    }

    fn opened(&mut self, opened: std::result::Result<AudioDecoder, MediaError>) {
        match opened {
            Ok(decoder) => {
                let duration = decoder.duration();
                debug!(
                    sample_rate = decoder.sample_rate(),
                    channels = decoder.channels(),
                    ?duration,
                    "Source opened"
                );
                self.publish(|t| t.duration = duration);
                self.decoder = Some(decoder);
                self.emit(MediaEvent::DurationChange(duration));
                self.emit(MediaEvent::LoadedMetadata(duration));
            }
            Err(e) => {
                warn!(error = %e, "Failed to open source");
                self.emit(MediaEvent::Error(e));
            }
        }
    }

    /// Fetch `url` on the host runtime. The body comes back through
    /// `fetched_tx`, stamped with the generation that asked for it.
    fn start_download(&mut self, url: String) -> std::result::Result<(), MediaError> {
        if self.http.is_none() {
            let client = reqwest::Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .map_err(|e| MediaError::network(e.to_string()))?;
            self.http = Some(client);
        }
        let Some(client) = self.http.clone() else {
            return Err(MediaError::network("HTTP client unavailable"));
        };

        info!(url, "Fetching remote source");
        let generation = self.generation;
        let fetched = self.fetched_tx.clone();
        let task = self.runtime.spawn(async move {
            let result = fetch(&client, &url).await;
            let _ = fetched.send(Fetched {
                generation,
                url,
                result,
            });
        });
        self.download = Some(Download {
            generation,
            task,
            play: false,
            seek: None,
        });
        Ok(())
    }

    fn cancel_download(&mut self) {
        if let Some(download) = self.download.take() {
            debug!(generation = download.generation, "Cancelling superseded download");
            download.task.abort();
        }
    }

    fn on_fetched(&mut self, body: Fetched) {
        let current = self
            .download
            .as_ref()
            .is_some_and(|d| d.generation == body.generation && body.generation == self.generation);
        if !current {
            debug!(url = %body.url, "Dropping stale download");
            return;
        }
        let Some(download) = self.download.take() else {
            return;
        };

        let extension = body
            .url
            .rsplit('/')
            .next()
            .and_then(|segment| segment.split(['?', '#']).next())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        let opened = body
            .result
            .and_then(|data| AudioDecoder::from_bytes(data, None, extension.as_deref()));
        self.opened(opened);

        if let Some(seconds) = download.seek {
            self.seek(seconds);
        }
        if download.play {
            self.play();
        }
    }

    fn play(&mut self) {
        if self.decoder.is_none() {
            return;
        }
        if self.ended {
            self.seek(0.0);
        }
        if !self.playing {
            self.playing = true;
            self.emit(MediaEvent::Play);
        }
    }

    fn seek(&mut self, seconds: f64) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        match decoder.seek(seconds) {
            Ok(landed) => {
                self.ended = false;
                self.backlog = None;
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.reset();
                }
                self.publish(|t| t.current_time = landed);
                self.emit(MediaEvent::TimeUpdate(landed));
            }
            Err(e) => warn!(error = %e, seconds, "Seek failed"),
        }
    }

    /// Produce at most one chunk for the source node.
    fn pump(&mut self) {
        if let Some(chunk) = self.backlog.take() {
            self.deliver(chunk);
            return;
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        let Some(output) = self.output.as_ref() else {
            return;
        };

        match decoder.decode_next() {
            Ok(Some(decoded)) => {
                if self.resampler.is_none() {
                    self.resampler = Some(Resampler::new(
                        decoder.sample_rate(),
                        self.rate,
                        output.sample_rate,
                        output.channels,
                    ));
                }
                let mapped = map_channels(&decoded.samples, decoded.channels, output.channels);
                let samples = match self.resampler.as_mut() {
                    Some(resampler) => resampler.process(&mapped),
                    None => mapped,
                };
                if !samples.is_empty() {
                    self.deliver(AudioChunk {
                        samples,
                        position: decoded.timestamp,
                    });
                }
                self.tick(decoded.timestamp);
            }
            Ok(None) => self.finish(),
            Err(e) => {
                warn!(error = %e, "Decode failed");
                self.decoder = None;
                self.playing = false;
                self.emit(MediaEvent::Error(e));
            }
        }
    }

    fn deliver(&mut self, chunk: AudioChunk) {
        let Some(output) = self.output.as_ref() else {
            return;
        };
        match output.chunks.send_timeout(chunk, Duration::from_millis(20)) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(chunk)) => self.backlog = Some(chunk),
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("Source node disconnected");
                self.output = None;
            }
        }
    }

    fn finish(&mut self) {
        let tail = self
            .resampler
            .as_mut()
            .map(Resampler::flush)
            .unwrap_or_default();
        if !tail.is_empty() {
            let position = self.timeline.lock().current_time;
            self.deliver(AudioChunk {
                samples: tail,
                position,
            });
        }
        if let Some(duration) = self.decoder.as_ref().and_then(AudioDecoder::duration) {
            self.publish(|t| t.current_time = duration);
        }
        self.playing = false;
        self.ended = true;
        self.emit(MediaEvent::Ended);
    }

    fn tick(&mut self, position: f64) {
        self.publish(|t| t.current_time = position);
        let due = self
            .last_time_update
            .is_none_or(|at| at.elapsed() >= TIME_UPDATE_INTERVAL);
        if due {
            self.last_time_update = Some(Instant::now());
            self.emit(MediaEvent::TimeUpdate(position));
        }
    }

    fn publish(&self, update: impl FnOnce(&mut Timeline)) {
        let mut timeline = self.timeline.lock();
        if timeline.generation == self.generation {
            update(&mut timeline);
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> std::result::Result<Vec<u8>, MediaError> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| MediaError::network(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| MediaError::network(e.to_string()))?;
    Ok(bytes.to_vec())
}
