//! Typed event bus shared by the engine, controller and device manager.
//!
//! Consumers (UI, visualizer, diagnostics) subscribe read-only. Each
//! [`PlayerEvent`] variant carries its own payload type, and listeners can
//! either see every event or filter on an [`EventKind`].
//!
//! ```ignore
//! let sub = bus.on(EventKind::TrackChange, |event| {
//!     if let PlayerEvent::TrackChange { track, .. } = event {
//!         println!("now playing {:?}", track.as_ref().map(|t| &t.title));
//!     }
//! });
//! // later
//! sub.unsubscribe();
//! ```

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::error::MediaError;
use crate::output::OutputDevice;
use crate::track::Track;

/// Everything the playback core announces.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Play,
    Pause,
    Ended,
    Error {
        error: MediaError,
    },
    TimeUpdate {
        current_time: f64,
    },
    DurationChange {
        duration: Option<f64>,
    },
    RateChange {
        rate: f64,
    },
    VolumeChange {
        volume: f32,
        muted: bool,
    },
    LoadedMetadata {
        duration: Option<f64>,
    },
    /// The controller selected a (possibly identical) track.
    ///
    /// Fired after the engine was told to load it; metadata may still be
    /// pending.
    TrackChange {
        track: Option<Track>,
        index: Option<usize>,
        queue_length: usize,
    },
    QueueChange {
        queue_length: usize,
    },
    SinkChange {
        sink_id: String,
        ok: bool,
        error: Option<String>,
    },
    DevicesChanged {
        devices: Vec<OutputDevice>,
    },
}

/// Discriminant of [`PlayerEvent`], used for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Play,
    Pause,
    Ended,
    Error,
    TimeUpdate,
    DurationChange,
    RateChange,
    VolumeChange,
    LoadedMetadata,
    TrackChange,
    QueueChange,
    SinkChange,
    DevicesChanged,
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Play => EventKind::Play,
            Self::Pause => EventKind::Pause,
            Self::Ended => EventKind::Ended,
            Self::Error { .. } => EventKind::Error,
            Self::TimeUpdate { .. } => EventKind::TimeUpdate,
            Self::DurationChange { .. } => EventKind::DurationChange,
            Self::RateChange { .. } => EventKind::RateChange,
            Self::VolumeChange { .. } => EventKind::VolumeChange,
            Self::LoadedMetadata { .. } => EventKind::LoadedMetadata,
            Self::TrackChange { .. } => EventKind::TrackChange,
            Self::QueueChange { .. } => EventKind::QueueChange,
            Self::SinkChange { .. } => EventKind::SinkChange,
            Self::DevicesChanged { .. } => EventKind::DevicesChanged,
        }
    }
}

type Listener = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

struct Entry {
    id: u64,
    filter: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Cloneable handle to a shared listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    /// Receive only events of one kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    fn register(&self, filter: Option<EventKind>, listener: Listener) -> Subscription {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            filter,
            listener,
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to every matching listener, in subscription order.
    ///
    /// Listeners are snapshotted first so they may subscribe or unsubscribe
    /// while being called.
    pub fn emit(&self, event: PlayerEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = {
            let registry = self.registry.lock();
            registry
                .entries
                .iter()
                .filter(|e| e.filter.is_none_or(|k| k == kind))
                .map(|e| Arc::clone(&e.listener))
                .collect()
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().entries.len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it leaves the listener registered; call [`Subscription::unsubscribe`]
/// to remove it.
#[must_use = "keep the Subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the listener. Returns false if the bus is gone or the listener
    /// was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock();
        let before = registry.entries.len();
        registry.entries.retain(|e| e.id != self.id);
        registry.entries.len() != before
    }
}
