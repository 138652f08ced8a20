//! Test doubles for the playback core.
//!
//! Every mock shares its state through an `Arc`, so a test keeps one clone
//! for assertions and hands another (boxed) to the code under test. Mocks
//! that touch the media path append to a shared [`OpLog`], which makes
//! cross-component ordering (e.g. the destroy sequence) assertable.
//!
//! # Example
//!
//! ```ignore
//! let h = EngineHarness::new();
//! let mut engine = h.engine();
//! engine.load("https://example.com/a.mp3").await;
//! engine.play().await;
//! assert!(h.log.contains("media.play"));
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::PlaybackConfig;
use crate::controller::PlaybackController;
use crate::engine::{
    AudioContext, AudioEngine, ContextFactory, ContextState, GraphHandle, MediaElement,
    MediaEvent, SourceNode, StreamHandler,
};
use crate::error::{Error, MediaError, Result};
use crate::events::{EventBus, EventKind, PlayerEvent, Subscription};
use crate::output::{DeviceBackend, OutputDevice, SinkTarget};
use crate::track::{ProbeOutcome, RemoteProbe, ResourceRegistry, Track, TrackSource};

/// Ordered record of operations across mocks.
#[derive(Debug, Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn push(&self, op: impl Into<String>) {
        self.0.lock().push(op.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, op: &str) -> bool {
        self.0.lock().iter().any(|e| e == op)
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

// ============================================================================
// Media element
// ============================================================================

struct MediaState {
    source: Option<String>,
    paused: bool,
    current_time: f64,
    duration: Option<f64>,
    rate: f64,
    volume: f32,
    muted: bool,
    events: Vec<MediaEvent>,
    play_error: Option<MediaError>,
}

/// Scriptable media element. Events only appear when pushed, except
/// `Play`/`Pause`, which follow transport calls.
#[derive(Clone)]
pub struct MockMedia {
    state: Arc<Mutex<MediaState>>,
    log: OpLog,
}

impl MockMedia {
    pub fn new(log: OpLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediaState {
                source: None,
                paused: true,
                current_time: 0.0,
                duration: None,
                rate: 1.0,
                volume: 1.0,
                muted: false,
                events: Vec::new(),
                play_error: None,
            })),
            log,
        }
    }

    pub fn source(&self) -> Option<String> {
        self.state.lock().source.clone()
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Duration reported for every source.
    pub fn set_known_duration(&self, duration: Option<f64>) {
        self.state.lock().duration = duration;
    }

    /// Move the playhead without logging a seek.
    pub fn set_time(&self, seconds: f64) {
        self.state.lock().current_time = seconds;
    }

    pub fn push_event(&self, event: MediaEvent) {
        self.state.lock().events.push(event);
    }

    pub fn fail_next_play(&self, error: MediaError) {
        self.state.lock().play_error = Some(error);
    }
}

#[async_trait(?Send)]
impl MediaElement for MockMedia {
    fn set_source(&mut self, url: Option<&str>) {
        self.log
            .push(format!("media.set_source:{}", url.unwrap_or("none")));
        let mut state = self.state.lock();
        state.source = url.map(str::to_string);
        state.paused = true;
        state.current_time = 0.0;
    }

    fn source(&self) -> Option<String> {
        MockMedia::source(self)
    }

    async fn play(&mut self) -> std::result::Result<(), MediaError> {
        self.log.push("media.play");
        let mut state = self.state.lock();
        if let Some(error) = state.play_error.take() {
            return Err(error);
        }
        state.paused = false;
        state.events.push(MediaEvent::Play);
        Ok(())
    }

    fn pause(&mut self) {
        self.log.push("media.pause");
        let mut state = self.state.lock();
        if !state.paused {
            state.paused = true;
            state.events.push(MediaEvent::Pause);
        }
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.log.push(format!("media.seek:{seconds}"));
        self.state.lock().current_time = seconds;
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.log.push(format!("media.rate:{rate}"));
        self.state.lock().rate = rate;
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.push(format!("media.volume:{volume}"));
        self.state.lock().volume = volume;
    }

    fn set_muted(&mut self, muted: bool) {
        self.log.push(format!("media.muted:{muted}"));
        self.state.lock().muted = muted;
    }

    fn create_source_node(&mut self, sample_rate: u32, channels: u16) -> Option<SourceNode> {
        self.log.push("media.source_node");
        let (_tx, rx) = crossbeam_channel::bounded(1);
        Some(SourceNode {
            chunks: rx,
            sample_rate,
            channels,
        })
    }

    fn drain_events(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.state.lock().events)
    }
}

// ============================================================================
// Audio context
// ============================================================================

struct ContextShared {
    created: usize,
    state: ContextState,
    sink: Option<String>,
    closed: bool,
    sink_supported: bool,
    fail_create: bool,
    fail_disconnect: bool,
    fail_sink: bool,
}

/// Factory for contexts that start suspended, like a gesture-gated browser.
#[derive(Clone)]
pub struct MockContextFactory {
    shared: Arc<Mutex<ContextShared>>,
    log: OpLog,
}

impl MockContextFactory {
    pub fn new(log: OpLog) -> Self {
        Self {
            shared: Arc::new(Mutex::new(ContextShared {
                created: 0,
                state: ContextState::Suspended,
                sink: None,
                closed: false,
                sink_supported: false,
                fail_create: false,
                fail_disconnect: false,
                fail_sink: false,
            })),
            log,
        }
    }

    pub fn created(&self) -> usize {
        self.shared.lock().created
    }

    pub fn sink(&self) -> Option<String> {
        self.shared.lock().sink.clone()
    }

    pub fn closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn support_sinks(&self, supported: bool) {
        self.shared.lock().sink_supported = supported;
    }

    pub fn fail_create(&self, fail: bool) {
        self.shared.lock().fail_create = fail;
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.shared.lock().fail_disconnect = fail;
    }

    pub fn fail_sink(&self, fail: bool) {
        self.shared.lock().fail_sink = fail;
    }
}

impl ContextFactory for MockContextFactory {
    fn create(&self, graph: GraphHandle, sink_id: Option<&str>) -> Result<Box<dyn AudioContext>> {
        self.log.push("context.create");
        let mut shared = self.shared.lock();
        if shared.fail_create {
            return Err(Error::context_failure("no audio hardware"));
        }
        shared.created += 1;
        shared.state = ContextState::Suspended;
        shared.sink = sink_id.map(str::to_string);
        shared.closed = false;
        Ok(Box::new(MockContext {
            shared: Arc::clone(&self.shared),
            log: self.log.clone(),
            _graph: graph,
        }))
    }

    fn supports_sink_selection(&self) -> bool {
        self.shared.lock().sink_supported
    }
}

struct MockContext {
    shared: Arc<Mutex<ContextShared>>,
    log: OpLog,
    _graph: GraphHandle,
}

#[async_trait(?Send)]
impl AudioContext for MockContext {
    fn state(&self) -> ContextState {
        self.shared.lock().state
    }

    async fn resume(&mut self) -> Result<()> {
        self.log.push("context.resume");
        self.shared.lock().state = ContextState::Running;
        Ok(())
    }

    async fn suspend(&mut self) -> Result<()> {
        self.log.push("context.suspend");
        self.shared.lock().state = ContextState::Suspended;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("context.close");
        let mut shared = self.shared.lock();
        shared.state = ContextState::Closed;
        shared.closed = true;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn channels(&self) -> u16 {
        2
    }

    fn connect_source(&mut self, _source: SourceNode) -> Result<()> {
        self.log.push("context.connect");
        Ok(())
    }

    fn disconnect_source(&mut self) -> Result<()> {
        self.log.push("context.disconnect");
        if self.shared.lock().fail_disconnect {
            return Err(Error::context_failure("already disconnected"));
        }
        Ok(())
    }

    fn supports_sink_selection(&self) -> bool {
        self.shared.lock().sink_supported
    }

    async fn set_sink_id(&mut self, sink_id: &str) -> Result<()> {
        self.log.push(format!("context.sink:{sink_id}"));
        let mut shared = self.shared.lock();
        if shared.fail_sink {
            return Err(Error::DeviceUnavailable(sink_id.to_string()));
        }
        shared.sink = Some(sink_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Stream handler
// ============================================================================

#[derive(Default)]
struct StreamShared {
    attaches: usize,
    destroys: usize,
    fail: bool,
}

#[derive(Clone)]
pub struct MockStreamHandler {
    shared: Arc<Mutex<StreamShared>>,
    log: OpLog,
}

impl MockStreamHandler {
    pub fn new(log: OpLog) -> Self {
        Self {
            shared: Arc::default(),
            log,
        }
    }

    pub fn attaches(&self) -> usize {
        self.shared.lock().attaches
    }

    pub fn destroys(&self) -> usize {
        self.shared.lock().destroys
    }

    pub fn fail_attach(&self, fail: bool) {
        self.shared.lock().fail = fail;
    }
}

#[async_trait(?Send)]
impl StreamHandler for MockStreamHandler {
    async fn attach(&mut self, url: &str, media: &mut dyn MediaElement) -> Result<()> {
        self.log.push(format!("stream.attach:{url}"));
        let fail = {
            let mut shared = self.shared.lock();
            shared.attaches += 1;
            shared.fail
        };
        if fail {
            return Err(MediaError::network("manifest unavailable").into());
        }
        media.set_source(Some(url));
        Ok(())
    }

    fn destroy(&mut self) {
        self.log.push("stream.destroy");
        self.shared.lock().destroys += 1;
    }
}

// ============================================================================
// Output devices
// ============================================================================

#[derive(Clone)]
pub struct MockDevices {
    devices: Arc<Mutex<Vec<OutputDevice>>>,
    fail: Arc<AtomicBool>,
}

impl MockDevices {
    pub fn new(devices: Vec<OutputDevice>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set(&self, devices: Vec<OutputDevice>) {
        *self.devices.lock() = devices;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait(?Send)]
impl DeviceBackend for MockDevices {
    async fn enumerate(&self) -> Result<Vec<OutputDevice>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::context_failure("enumeration denied"));
        }
        Ok(self.devices.lock().clone())
    }

    fn supports_sink_selection(&self) -> bool {
        true
    }
}

/// Records applied sink ids.
#[derive(Debug, Default)]
pub struct MockSinkTarget {
    pub supported: bool,
    pub fail: bool,
    pub applied: Vec<String>,
}

impl MockSinkTarget {
    pub fn supported() -> Self {
        Self {
            supported: true,
            ..Self::default()
        }
    }

    pub fn unsupported() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            supported: true,
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait(?Send)]
impl SinkTarget for MockSinkTarget {
    fn supports_sink_selection(&self) -> bool {
        self.supported
    }

    async fn apply_sink(&mut self, sink_id: &str) -> Result<()> {
        if !self.supported {
            return Err(Error::SinkUnsupported);
        }
        if self.fail {
            return Err(Error::DeviceUnavailable(sink_id.to_string()));
        }
        self.applied.push(sink_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Remote probe
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    duration: Option<f64>,
    mime: Option<String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockProbe {
    /// Learns nothing.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_duration(seconds: f64, mime: &str) -> Self {
        Self {
            duration: Some(seconds),
            mime: Some(mime.to_string()),
            ..Self::default()
        }
    }

    /// Answer only after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl RemoteProbe for MockProbe {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        ProbeOutcome {
            duration: self.duration,
            mime: self.mime.clone(),
        }
    }
}

// ============================================================================
// Events and fixtures
// ============================================================================

/// Captures everything emitted on a bus.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<PlayerEvent>>>,
    _subscription: Subscription,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = bus.subscribe(move |e| sink.lock().push(e.clone()));
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(PlayerEvent::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Indices announced by `trackchange`, in order.
    pub fn track_change_indices(&self) -> Vec<Option<usize>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::TrackChange { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// 16-bit PCM WAV holding a quiet sine, `frames` frames long.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let data_len = frames * usize::from(channels) * 2;
    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for i in 0..frames {
        let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

/// Remote track at `https://example.com/<name>.mp3` with a fixed duration.
pub fn test_track(name: &str) -> Track {
    Track {
        duration: Some(180.0),
        mime: Some("audio/mpeg".to_string()),
        is_stream: false,
        ..Track::remote(format!("https://example.com/{name}.mp3"), name)
    }
}

/// Local track backed by a registered (not necessarily existing) file.
pub fn local_track(resources: &ResourceRegistry, name: &str) -> Track {
    let url = resources.register_file(format!("/music/{name}.flac"));
    Track {
        url,
        source: TrackSource::Local,
        is_stream: false,
        duration: Some(180.0),
        mime: Some("audio/flac".to_string()),
        ..Track::remote("", name)
    }
}

/// One set of mocks sharing an op log and event bus.
pub struct EngineHarness {
    pub log: OpLog,
    pub media: MockMedia,
    pub contexts: MockContextFactory,
    pub streams: MockStreamHandler,
    pub bus: EventBus,
    pub recorder: EventRecorder,
    pub resources: Arc<ResourceRegistry>,
}

impl EngineHarness {
    pub fn new() -> Self {
        let log = OpLog::default();
        let bus = EventBus::new();
        Self {
            media: MockMedia::new(log.clone()),
            contexts: MockContextFactory::new(log.clone()),
            streams: MockStreamHandler::new(log.clone()),
            recorder: EventRecorder::attach(&bus),
            resources: Arc::new(ResourceRegistry::new()),
            log,
            bus,
        }
    }

    pub fn engine(&self) -> AudioEngine {
        AudioEngine::new(
            Box::new(self.media.clone()),
            Box::new(self.contexts.clone()),
            self.bus.clone(),
        )
    }

    pub fn engine_with_streams(&self) -> AudioEngine {
        self.engine()
            .with_stream_handler(Box::new(self.streams.clone()))
    }

    pub fn controller(&self, config: &PlaybackConfig) -> PlaybackController {
        PlaybackController::new(
            self.engine(),
            Arc::clone(&self.resources),
            self.bus.clone(),
            config,
        )
        .with_shuffle_seed(42)
    }
}
