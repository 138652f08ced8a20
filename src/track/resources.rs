//! Ephemeral local resource handles (`blob:glasswave/<n>`).
//!
//! Local files and embedded artwork are exposed to the engine through opaque
//! handles so a `Track` never carries a raw filesystem path as its URL. Each
//! handle must be released exactly once; the counters make leaks and double
//! releases observable in tests and diagnostics.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const HANDLE_PREFIX: &str = "blob:glasswave/";

/// What a handle points at.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalResource {
    File(PathBuf),
    Bytes { data: Arc<Vec<u8>>, mime: String },
}

/// Handle bookkeeping counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub live: usize,
    pub created: u64,
    pub released: u64,
    pub double_releases: u64,
}

#[derive(Default)]
struct Inner {
    next: u64,
    live: HashMap<u64, LocalResource>,
    stats: ResourceStats,
}

/// Registry of live local resource handles.
#[derive(Default)]
pub struct ResourceRegistry {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a URL is one of our handles.
    pub fn is_handle(url: &str) -> bool {
        url.starts_with(HANDLE_PREFIX)
    }

    fn parse(handle: &str) -> Option<u64> {
        handle.strip_prefix(HANDLE_PREFIX)?.parse().ok()
    }

    fn register(&self, resource: LocalResource) -> String {
        let mut inner = self.inner.lock();
        inner.next += 1;
        let id = inner.next;
        inner.live.insert(id, resource);
        inner.stats.created += 1;
        inner.stats.live = inner.live.len();
        format!("{HANDLE_PREFIX}{id}")
    }

    pub fn register_file(&self, path: impl Into<PathBuf>) -> String {
        self.register(LocalResource::File(path.into()))
    }

    pub fn register_bytes(&self, data: Vec<u8>, mime: impl Into<String>) -> String {
        self.register(LocalResource::Bytes {
            data: Arc::new(data),
            mime: mime.into(),
        })
    }

    /// Look up a live handle.
    pub fn resolve(&self, handle: &str) -> Option<LocalResource> {
        let id = Self::parse(handle)?;
        self.inner.lock().live.get(&id).cloned()
    }

    /// Release a handle. Returns false (and logs) if it was not live.
    pub fn release(&self, handle: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = Self::parse(handle).and_then(|id| inner.live.remove(&id));
        match removed {
            Some(_) => {
                inner.stats.released += 1;
                inner.stats.live = inner.live.len();
                true
            }
            None => {
                inner.stats.double_releases += 1;
                tracing::warn!(handle, "Release of unknown or already released resource");
                false
            }
        }
    }

    pub fn stats(&self) -> ResourceStats {
        self.inner.lock().stats
    }
}
