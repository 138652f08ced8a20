//! Playback controller: queue ownership and navigation policy.
//!
//! Bridges engine events (`ended`, `error`) to queue-aware lifecycle events
//! (`trackchange`, `queuechange`). Tracks leaving the queue for good have
//! their local handles released here, exactly once.

mod queue;

pub use queue::{PlayQueue, RepeatMode};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::engine::{AudioEngine, SpectrumData, Visibility};
use crate::error::{MediaError, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::output::SinkTarget;
use crate::track::{ResourceRegistry, Track, release_track};

pub struct PlaybackController {
    engine: AudioEngine,
    queue: PlayQueue,
    resources: Arc<ResourceRegistry>,
    events: EventBus,
    autoplay_next: bool,
    restart_threshold: f64,
    max_failures: u32,
    failures: u32,
    /// Stopped at the end of the queue (or gave up after errors)
    finished: bool,
}

impl PlaybackController {
    pub fn new(
        engine: AudioEngine,
        resources: Arc<ResourceRegistry>,
        events: EventBus,
        config: &PlaybackConfig,
    ) -> Self {
        let mut queue = PlayQueue::new();
        queue.set_shuffle(config.shuffle);
        queue.set_repeat(config.repeat);
        Self {
            engine,
            queue,
            resources,
            events,
            autoplay_next: config.autoplay_next,
            restart_threshold: config.restart_threshold().as_secs_f64(),
            max_failures: config.max_consecutive_failures.max(1),
            failures: 0,
            finished: false,
        }
    }

    /// Use a reproducible shuffle. Keeps the current shuffle/repeat flags.
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        let mut queue = PlayQueue::with_seed(seed);
        queue.set_repeat(self.queue.repeat());
        queue.set_shuffle(self.queue.shuffle());
        self.queue = queue;
        self
    }

    // ========================================================================
    // Queue mutations
    // ========================================================================

    /// Replace the queue and start playing `start`.
    pub async fn set_queue(&mut self, tracks: Vec<Track>, start: usize) {
        let old = self.queue.replace(tracks, start);
        self.failures = 0;
        self.emit_queue_change();

        if self.queue.is_empty() {
            self.engine.unload();
            self.finished = false;
            self.emit_track_change();
        } else {
            self.load_current(true).await;
        }
        self.release_departed(old);
    }

    /// Insert tracks at `position` (or append). An empty queue selects and
    /// loads the first new track without starting playback.
    pub async fn add_to_queue(&mut self, tracks: Vec<Track>, position: Option<usize>) {
        if tracks.is_empty() {
            return;
        }
        let was_empty = self.queue.is_empty();
        self.queue.insert(position, tracks);
        self.emit_queue_change();
        if was_empty {
            self.load_current(false).await;
        }
    }

    /// Remove one entry. Removing the current track loads its successor,
    /// playing if the removed track was playing.
    pub async fn remove_from_queue(&mut self, index: usize) -> bool {
        let was_current = self.queue.current_index() == Some(index);
        let was_playing = self.engine.is_playing();
        let Some(removed) = self.queue.remove(index) else {
            return false;
        };
        self.emit_queue_change();

        if self.queue.is_empty() {
            self.engine.unload();
            self.finished = false;
            self.emit_track_change();
        } else if was_current {
            self.load_current(was_playing).await;
        }

        if !self.queue.contains_id(removed.id) {
            release_track(&self.resources, &removed);
        }
        true
    }

    pub fn move_in_queue(&mut self, from: usize, to: usize) -> bool {
        let moved = self.queue.move_item(from, to);
        if moved {
            self.emit_queue_change();
        }
        moved
    }

    /// Empty the queue, stop playback and release every track.
    pub fn clear_queue(&mut self) {
        let old = self.queue.clear();
        self.engine.unload();
        self.finished = false;
        self.failures = 0;
        self.emit_queue_change();
        self.emit_track_change();
        self.release_departed(old);
    }

    /// Jump to an entry and play it.
    pub async fn play_index(&mut self, index: usize) {
        if self.queue.jump_to(index) {
            self.failures = 0;
            self.load_current(true).await;
        }
    }

    /// Release tracks that no longer appear anywhere in the queue. Each
    /// track id is released once even if it appeared several times.
    fn release_departed(&self, tracks: Vec<Track>) {
        let mut released = HashSet::new();
        for track in tracks {
            if !self.queue.contains_id(track.id) && released.insert(track.id) {
                release_track(&self.resources, &track);
            }
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Advance per shuffle/repeat. At the end with repeat off this does
    /// nothing and playback continues.
    pub async fn next_track(&mut self) {
        if self.queue.next().is_some() {
            self.load_current(true).await;
        } else {
            debug!("Next ignored: end of queue");
        }
    }

    /// Restart the current track when past the restart threshold, otherwise
    /// step back. At the start with repeat off, restart.
    pub async fn prev_track(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        if self.engine.current_time() > self.restart_threshold {
            self.restart_current().await;
        } else if self.queue.previous().is_some() {
            self.load_current(true).await;
        } else {
            self.restart_current().await;
        }
    }

    async fn restart_current(&mut self) {
        if self.engine.duration().is_some() {
            self.engine.seek(0.0);
        } else {
            // Streams cannot seek; reload instead
            self.load_current(true).await;
        }
    }

    async fn load_current(&mut self, autoplay: bool) {
        let Some(index) = self.queue.current_index() else {
            return;
        };
        self.queue.mark_played(index);
        let Some(track) = self.queue.get(index).cloned() else {
            return;
        };

        info!(index, id = %track.id, title = %track.title, "Track change");
        self.engine.load(&track.url).await;
        self.finished = false;
        self.events.emit(PlayerEvent::TrackChange {
            track: Some(track),
            index: Some(index),
            queue_length: self.queue.len(),
        });
        if autoplay {
            self.engine.play().await;
        }
    }

    // ========================================================================
    // Engine events
    // ========================================================================

    /// Drain engine events, apply the end/error policy, and return them.
    pub async fn poll(&mut self) -> Vec<PlayerEvent> {
        let events = self.engine.poll();
        for event in &events {
            let transitioned = match event {
                // `play` fires before a broken source errors, so only
                // metadata proves the track is playable
                PlayerEvent::LoadedMetadata { .. } => {
                    self.failures = 0;
                    false
                }
                PlayerEvent::Ended => {
                    self.handle_ended().await;
                    true
                }
                PlayerEvent::Error { error } if error.kind.is_load_failure() => {
                    self.handle_load_error(error).await
                }
                _ => false,
            };
            // Anything after a transition belongs to the previous source
            if transitioned {
                break;
            }
        }
        events
    }

    async fn handle_ended(&mut self) {
        if !self.autoplay_next {
            self.finished = true;
            self.emit_track_change();
            return;
        }
        if self.queue.next().is_some() {
            self.load_current(true).await;
        } else {
            info!("Reached end of queue");
            self.finished = true;
        }
    }

    /// Skip past a track that failed to load, or stop when there is nothing
    /// to skip to. Returns true if playback moved or stopped.
    async fn handle_load_error(&mut self, error: &MediaError) -> bool {
        self.failures += 1;
        warn!(error = %error, failures = self.failures, "Track failed to load");
        if !self.autoplay_next {
            self.stop();
            return true;
        }
        if self.failures >= self.max_failures {
            warn!(max = self.max_failures, "Too many consecutive failures, stopping");
            self.stop();
            return true;
        }

        // Repeat-one would retry the broken track forever
        let repeat = self.queue.repeat();
        if repeat == RepeatMode::One {
            self.queue.set_repeat(RepeatMode::Off);
        }
        let next = self.queue.next();
        self.queue.set_repeat(repeat);

        if next.is_some() {
            self.load_current(true).await;
        } else {
            self.stop();
        }
        true
    }

    /// Silence the engine and mark playback finished. The current entry
    /// stays selected so `play()` can retry it.
    fn stop(&mut self) {
        self.engine.unload();
        self.finished = true;
    }

    fn emit_queue_change(&self) {
        self.events.emit(PlayerEvent::QueueChange {
            queue_length: self.queue.len(),
        });
    }

    fn emit_track_change(&self) {
        self.events.emit(PlayerEvent::TrackChange {
            track: self.queue.current().cloned(),
            index: self.queue.current_index(),
            queue_length: self.queue.len(),
        });
    }

    // ========================================================================
    // Transport passthroughs
    // ========================================================================

    pub async fn play(&mut self) {
        if self.finished {
            self.load_current(true).await;
        } else {
            self.engine.play().await;
        }
    }

    pub fn pause(&mut self) {
        self.engine.pause();
    }

    pub async fn toggle(&mut self) {
        if self.engine.is_playing() {
            self.engine.pause();
        } else {
            self.play().await;
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        self.engine.seek(seconds);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.engine.set_volume(volume);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.engine.set_muted(muted);
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.engine.set_rate(rate);
    }

    pub fn set_eq_enabled(&mut self, enabled: bool) -> bool {
        self.engine.set_eq_enabled(enabled)
    }

    pub fn set_eq_gain(&mut self, band: usize, gain_db: f32) {
        self.engine.set_eq_gain(band, gain_db);
    }

    pub fn set_limiter_enabled(&mut self, enabled: bool) {
        self.engine.set_limiter_enabled(enabled);
    }

    pub async fn on_visibility_change(&mut self, visibility: Visibility) {
        self.engine.on_visibility_change(visibility).await;
    }

    pub fn spectrum(&self) -> Option<SpectrumData> {
        self.engine.spectrum()
    }

    pub fn volume(&self) -> f32 {
        self.engine.volume()
    }

    pub fn is_muted(&self) -> bool {
        self.engine.is_muted()
    }

    pub fn rate(&self) -> f64 {
        self.engine.rate()
    }

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    pub fn duration(&self) -> Option<f64> {
        self.engine.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.queue.set_shuffle(enabled);
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.queue.set_repeat(mode);
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.queue.cycle_repeat()
    }

    pub fn set_autoplay_next(&mut self, enabled: bool) {
        self.autoplay_next = enabled;
    }

    pub fn autoplay_next(&self) -> bool {
        self.autoplay_next
    }

    // ========================================================================
    // Accessors and teardown
    // ========================================================================

    pub fn queue(&self) -> &PlayQueue {
        &self.queue
    }

    pub fn current_index(&self) -> Option<usize> {
        self.queue.current_index()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.queue.current()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Release every queued track and tear the engine down.
    pub async fn destroy(&mut self) {
        let old = self.queue.clear();
        self.release_departed(old);
        self.engine.destroy().await;
    }
}

#[async_trait(?Send)]
impl SinkTarget for PlaybackController {
    fn supports_sink_selection(&self) -> bool {
        self.engine.supports_sink_selection()
    }

    async fn apply_sink(&mut self, sink_id: &str) -> Result<()> {
        self.engine.try_set_output_device(sink_id).await
    }
}
