//! Audio engine: sole owner of the real-time audio path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │               AudioEngine (caller's task, !Send)             │
//! │  transport, volume/rate, graph rewiring, power management    │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │ MediaElement                 │ AudioContext
//!                 ▼                              ▼
//! ┌──────────────────────────────┐  ┌────────────────────────────┐
//! │ media (decode, timeline)     │─▶│ ProcessingGraph (callback) │
//! │ emits MediaEvents            │  │ EQ → limiter → gain → out  │
//! └──────────────────────────────┘  └────────────────────────────┘
//! ```
//!
//! The audio context is created lazily on the first `load`/`play`, never
//! speculatively. Transport failures never unwind: they are queued and
//! delivered as [`PlayerEvent::Error`] by [`AudioEngine::poll`].

pub mod analyser;
pub mod context;
pub mod dsp;
pub mod graph;
pub mod media;
pub mod stream;

pub use analyser::{Analyser, SpectrumData};
pub use context::{AudioChunk, AudioContext, ContextFactory, ContextState, SourceNode};
pub use dsp::{Equalizer, Limiter, ParametricEq};
pub use graph::{Edge, GraphHandle, NodeKind, ProcessingGraph};
pub use media::{MediaElement, MediaEvent};
pub use stream::StreamHandler;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::{Error, MediaError, MediaErrorKind, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::track::url::check_source;

pub const MIN_RATE: f64 = 0.25;
pub const MAX_RATE: f64 = 4.0;

/// Page/window visibility, for idle power management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Coarse engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Uninitialized,
    /// Context exists and a source is attached (or was released)
    Ready,
    Playing,
    Paused,
    Closed,
}

pub struct AudioEngine {
    media: Box<dyn MediaElement>,
    factory: Box<dyn ContextFactory>,
    context: Option<Box<dyn AudioContext>>,
    graph: Option<GraphHandle>,
    /// Held until the graph is built
    equalizer: Option<Box<dyn Equalizer>>,
    stream_handler: Option<Box<dyn StreamHandler>>,
    stream_active: bool,
    events: EventBus,
    outbox: Vec<PlayerEvent>,
    status: EngineStatus,
    volume: f32,
    muted: bool,
    rate: f64,
    limiter_enabled: bool,
    eq_enabled: bool,
    eq_gains: Vec<f32>,
    fft_size: usize,
    sink_id: Option<String>,
    suspended_by_engine: bool,
    current_url: Option<String>,
}

impl AudioEngine {
    pub fn new(
        media: Box<dyn MediaElement>,
        factory: Box<dyn ContextFactory>,
        events: EventBus,
    ) -> Self {
        let defaults = AudioConfig::default();
        Self {
            media,
            factory,
            context: None,
            graph: None,
            equalizer: None,
            stream_handler: None,
            stream_active: false,
            events,
            outbox: Vec::new(),
            status: EngineStatus::Uninitialized,
            volume: defaults.volume,
            muted: defaults.muted,
            rate: defaults.playback_rate,
            limiter_enabled: defaults.limiter_enabled,
            eq_enabled: defaults.eq_enabled,
            eq_gains: Vec::new(),
            fft_size: defaults.fft_size,
            sink_id: None,
            suspended_by_engine: false,
            current_url: None,
        }
    }

    /// Supply the EQ stage. Without one, `set_eq_enabled` is refused.
    pub fn with_equalizer(mut self, equalizer: Box<dyn Equalizer>) -> Self {
        self.equalizer = Some(equalizer);
        self
    }

    /// Supply an adaptive-streaming handler for HLS URLs.
    pub fn with_stream_handler(mut self, handler: Box<dyn StreamHandler>) -> Self {
        self.stream_handler = Some(handler);
        self
    }

    /// Apply initial settings. No events are emitted.
    pub fn with_config(mut self, config: &AudioConfig) -> Self {
        if config.volume.is_finite() {
            self.volume = config.volume.clamp(0.0, 1.0);
        }
        self.muted = config.muted;
        if config.playback_rate.is_finite() {
            self.rate = config.playback_rate.clamp(MIN_RATE, MAX_RATE);
        }
        self.limiter_enabled = config.limiter_enabled;
        self.eq_enabled = config.eq_enabled;
        self.eq_gains = config.eq_gains_db.clone();
        self.fft_size = config.fft_size;
        self.media.set_volume(self.volume);
        self.media.set_muted(self.muted);
        self
    }

    fn is_closed(&self) -> bool {
        self.status == EngineStatus::Closed
    }

    fn effective_gain(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }

    fn build_graph(&mut self) -> GraphHandle {
        let mut graph = ProcessingGraph::new(self.equalizer.take(), self.fft_size);
        graph.set_limiter_enabled(self.limiter_enabled);
        for (band, gain) in self.eq_gains.iter().enumerate() {
            graph.set_eq_gain(band, *gain);
        }
        if self.eq_enabled && !graph.set_eq_enabled(true) {
            debug!("EQ requested but no equalizer was supplied");
        }
        graph.set_gain(self.effective_gain());
        graph.into_handle()
    }

    /// Create the context and graph on first use.
    fn ensure_context(&mut self) -> bool {
        if self.context.is_some() {
            return true;
        }
        if self.is_closed() {
            return false;
        }

        let graph = match &self.graph {
            Some(graph) => Arc::clone(graph),
            None => {
                let graph = self.build_graph();
                self.graph = Some(Arc::clone(&graph));
                graph
            }
        };

        match self.factory.create(Arc::clone(&graph), self.sink_id.as_deref()) {
            Ok(mut context) => {
                let (sample_rate, channels) = (context.sample_rate(), context.channels());
                graph.lock().configure(sample_rate, channels);
                match self.media.create_source_node(sample_rate, channels) {
                    Some(node) => {
                        if let Err(e) = context.connect_source(node) {
                            warn!(error = %e, "Failed to connect media source to graph");
                        }
                    }
                    None => warn!("Media element did not provide a source node"),
                }
                info!(sample_rate, channels, "Audio context created");
                self.context = Some(context);
                if self.status == EngineStatus::Uninitialized {
                    self.status = EngineStatus::Ready;
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Audio context unavailable");
                self.outbox.push(PlayerEvent::Error {
                    error: MediaError::new(MediaErrorKind::Unknown, e.to_string()),
                });
                false
            }
        }
    }

    fn teardown_stream(&mut self) {
        if !self.stream_active {
            return;
        }
        if let Some(handler) = self.stream_handler.as_mut() {
            handler.destroy();
        }
        self.stream_active = false;
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Replace the current source.
    ///
    /// URLs outside the allow-list are rejected with an error event before
    /// any media operation. HLS URLs go through the stream handler when one
    /// is installed, falling back to native playback if it cannot attach.
    pub async fn load(&mut self, url: &str) {
        if self.is_closed() {
            return;
        }
        self.teardown_stream();

        if let Err(e) = check_source(url) {
            warn!(url, "Rejected media source");
            // The previous source must not keep playing under the new track
            if self.media.source().is_some() || self.current_url.is_some() {
                self.unload();
            }
            self.outbox.push(PlayerEvent::Error {
                error: MediaError::new(MediaErrorKind::InvalidSource, e.to_string()),
            });
            return;
        }

        self.ensure_context();
        self.current_url = Some(url.to_string());

        let mut attached = false;
        if let Some(handler) = self.stream_handler.as_mut()
            && handler.can_handle(url)
        {
            match handler.attach(url, self.media.as_mut()).await {
                Ok(()) => {
                    debug!(url, "Stream handler attached");
                    attached = true;
                }
                Err(e) => {
                    warn!(url, error = %e, "Stream attach failed, using native playback");
                    handler.destroy();
                }
            }
        }
        self.stream_active = attached;
        if !attached {
            self.media.set_source(Some(url));
        }

        self.media.set_playback_rate(self.rate);
        if self.context.is_some() {
            self.status = EngineStatus::Ready;
        }
    }

    /// Release the current source without closing the engine.
    pub fn unload(&mut self) {
        if self.is_closed() {
            return;
        }
        self.media.pause();
        self.teardown_stream();
        self.media.set_source(None);
        self.current_url = None;
        if self.status != EngineStatus::Uninitialized {
            self.status = EngineStatus::Ready;
        }
    }

    /// Start playback, resuming a suspended context first.
    ///
    /// Rejections (autoplay blocks) are delivered as error events.
    pub async fn play(&mut self) {
        if self.is_closed() || self.media.source().is_none() {
            return;
        }
        self.ensure_context();

        if let Some(context) = self.context.as_mut()
            && context.state() == ContextState::Suspended
        {
            match context.resume().await {
                Ok(()) => self.suspended_by_engine = false,
                Err(e) => warn!(error = %e, "Failed to resume audio context"),
            }
        }

        match self.media.play().await {
            Ok(()) => self.status = EngineStatus::Playing,
            Err(error) => {
                warn!(error = %error, "Playback rejected");
                self.outbox.push(PlayerEvent::Error { error });
            }
        }
    }

    pub fn pause(&mut self) {
        if self.is_closed() {
            return;
        }
        self.media.pause();
        if self.status == EngineStatus::Playing {
            self.status = EngineStatus::Paused;
        }
    }

    pub async fn toggle(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play().await;
        }
    }

    /// Seek, clamped to `[0, duration]`. No-op while the duration is unknown.
    pub fn seek(&mut self, seconds: f64) {
        if self.is_closed() || seconds.is_nan() {
            return;
        }
        let Some(duration) = self.duration() else {
            debug!("Seek ignored: duration unknown");
            return;
        };
        self.media.set_current_time(seconds.clamp(0.0, duration));
    }

    /// Set the volume, clamped to `[0, 1]`. NaN is ignored.
    pub fn set_volume(&mut self, volume: f32) {
        if self.is_closed() || volume.is_nan() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.sync_volume();
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.is_closed() {
            return;
        }
        self.muted = muted;
        self.sync_volume();
    }

    fn sync_volume(&mut self) {
        self.media.set_volume(self.volume);
        self.media.set_muted(self.muted);
        if let Some(graph) = &self.graph {
            graph.lock().set_gain(self.effective_gain());
        }
        self.events.emit(PlayerEvent::VolumeChange {
            volume: self.volume,
            muted: self.muted,
        });
    }

    /// Set the playback rate, clamped to `[0.25, 4]`.
    pub fn set_rate(&mut self, rate: f64) {
        if self.is_closed() || rate.is_nan() {
            return;
        }
        self.rate = rate.clamp(MIN_RATE, MAX_RATE);
        self.media.set_playback_rate(self.rate);
        self.events.emit(PlayerEvent::RateChange { rate: self.rate });
    }

    // ========================================================================
    // Output routing
    // ========================================================================

    pub fn supports_sink_selection(&self) -> bool {
        match &self.context {
            Some(context) => context.supports_sink_selection(),
            None => self.factory.supports_sink_selection(),
        }
    }

    /// Route output to a sink. Before the context exists the id is stored
    /// and applied on creation.
    pub async fn try_set_output_device(&mut self, sink_id: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::context_failure("engine is closed"));
        }
        if !self.supports_sink_selection() {
            return Err(Error::SinkUnsupported);
        }
        if let Some(context) = self.context.as_mut() {
            context.set_sink_id(sink_id).await?;
        }
        self.sink_id = Some(sink_id.to_string());
        Ok(())
    }

    /// Best-effort variant of [`Self::try_set_output_device`].
    pub async fn set_output_device(&mut self, sink_id: &str) {
        if let Err(e) = self.try_set_output_device(sink_id).await {
            debug!(sink_id, error = %e, "Output device not applied");
        }
    }

    pub fn output_device(&self) -> Option<&str> {
        self.sink_id.as_deref()
    }

    // ========================================================================
    // Graph controls
    // ========================================================================

    /// Returns false when no equalizer is available.
    pub fn set_eq_enabled(&mut self, enabled: bool) -> bool {
        if self.is_closed() {
            return false;
        }
        self.eq_enabled = enabled;
        match &self.graph {
            Some(graph) => graph.lock().set_eq_enabled(enabled),
            None => self.equalizer.is_some(),
        }
    }

    pub fn set_eq_gain(&mut self, band: usize, gain_db: f32) {
        if self.is_closed() || !gain_db.is_finite() {
            return;
        }
        if self.eq_gains.len() <= band {
            self.eq_gains.resize(band + 1, 0.0);
        }
        self.eq_gains[band] = gain_db;
        if let Some(graph) = &self.graph {
            graph.lock().set_eq_gain(band, gain_db);
        }
    }

    pub fn set_limiter_enabled(&mut self, enabled: bool) {
        if self.is_closed() {
            return;
        }
        self.limiter_enabled = enabled;
        if let Some(graph) = &self.graph {
            graph.lock().set_limiter_enabled(enabled);
        }
    }

    /// Latest analyser frame, once the graph exists.
    pub fn spectrum(&self) -> Option<SpectrumData> {
        self.graph.as_ref().map(|g| g.lock().spectrum())
    }

    /// Current main chain, for diagnostics. Empty before the graph exists.
    pub fn graph_route(&self) -> Vec<NodeKind> {
        self.graph
            .as_ref()
            .map(|g| g.lock().route().to_vec())
            .unwrap_or_default()
    }

    pub fn graph_edges(&self) -> Vec<Edge> {
        self.graph
            .as_ref()
            .map(|g| g.lock().edges().to_vec())
            .unwrap_or_default()
    }

    pub fn master_gain(&self) -> Option<f32> {
        self.graph.as_ref().map(|g| g.lock().gain())
    }

    // ========================================================================
    // Power management and lifecycle
    // ========================================================================

    /// Suspend the idle context when hidden; resume only what we suspended.
    pub async fn on_visibility_change(&mut self, visibility: Visibility) {
        if self.is_closed() {
            return;
        }
        let playing = self.is_playing();
        let Some(context) = self.context.as_mut() else {
            return;
        };

        match visibility {
            Visibility::Hidden => {
                if playing || context.state() != ContextState::Running {
                    return;
                }
                match context.suspend().await {
                    Ok(()) => {
                        debug!("Suspended idle audio context");
                        self.suspended_by_engine = true;
                    }
                    Err(e) => warn!(error = %e, "Failed to suspend audio context"),
                }
            }
            Visibility::Visible => {
                if !self.suspended_by_engine {
                    return;
                }
                self.suspended_by_engine = false;
                if context.state() == ContextState::Suspended
                    && let Err(e) = context.resume().await
                {
                    warn!(error = %e, "Failed to resume audio context");
                }
            }
        }
    }

    /// Deliver pending events in timeline order and return them.
    ///
    /// Engine-generated events (rejections, context failures) come first,
    /// then media events in the order the element produced them.
    pub fn poll(&mut self) -> Vec<PlayerEvent> {
        let mut events = std::mem::take(&mut self.outbox);
        if !self.is_closed() {
            for event in self.media.drain_events() {
                match event {
                    MediaEvent::Play => self.status = EngineStatus::Playing,
                    MediaEvent::Pause | MediaEvent::Ended => {
                        if self.status == EngineStatus::Playing {
                            self.status = EngineStatus::Paused;
                        }
                    }
                    _ => {}
                }
                events.push(event.into());
            }
        }
        for event in &events {
            self.events.emit(event.clone());
        }
        events
    }

    /// Tear everything down. Each step runs even if an earlier one failed.
    pub async fn destroy(&mut self) {
        if self.is_closed() {
            return;
        }

        self.media.pause();
        self.media.set_source(None);
        self.teardown_stream();

        if let Some(context) = self.context.as_mut()
            && let Err(e) = context.disconnect_source()
        {
            warn!(error = %e, "Failed to disconnect graph head");
        }
        if let Some(mut context) = self.context.take()
            && let Err(e) = context.close().await
        {
            warn!(error = %e, "Failed to close audio context");
        }

        self.graph = None;
        self.current_url = None;
        self.outbox.clear();
        self.status = EngineStatus::Closed;
        info!("Audio engine destroyed");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn current_time(&self) -> f64 {
        if self.is_closed() {
            0.0
        } else {
            self.media.current_time()
        }
    }

    /// Finite, positive duration of the current source.
    pub fn duration(&self) -> Option<f64> {
        self.media
            .duration()
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn is_playing(&self) -> bool {
        !self.is_closed() && self.media.source().is_some() && !self.media.is_paused()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn context_state(&self) -> Option<ContextState> {
        self.context.as_ref().map(|c| c.state())
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }
}
