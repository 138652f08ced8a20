//! Output device registry.
//!
//! Enumerates sinks, persists the preferred one, and keeps the stored
//! choice honest: an id that is no longer present falls back to `"default"`
//! and the override is cleared. A transient failure to apply a sink never
//! touches the stored preference.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::AudioEngine;
use crate::error::{Error, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::prefs::PreferenceStore;

pub const DEFAULT_SINK: &str = "default";
pub const COMMUNICATIONS_SINK: &str = "communications";
/// Preference key holding the preferred sink id.
pub const OUTPUT_DEVICE_KEY: &str = "audio.output_device";

/// One enumerated output sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDevice {
    pub id: String,
    /// May be empty until the platform grants label access
    pub label: String,
    pub is_default: bool,
}

impl OutputDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            is_default: id == DEFAULT_SINK,
            label: label.into(),
            id,
        }
    }

    /// Label, or the id when the label is hidden.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() { &self.id } else { &self.label }
    }
}

/// Platform enumeration of output sinks.
#[async_trait(?Send)]
pub trait DeviceBackend {
    async fn enumerate(&self) -> Result<Vec<OutputDevice>>;

    fn supports_sink_selection(&self) -> bool;
}

/// Something that can route audio to a sink (the engine or controller).
#[async_trait(?Send)]
pub trait SinkTarget {
    fn supports_sink_selection(&self) -> bool;

    async fn apply_sink(&mut self, sink_id: &str) -> Result<()>;
}

#[async_trait(?Send)]
impl SinkTarget for AudioEngine {
    fn supports_sink_selection(&self) -> bool {
        AudioEngine::supports_sink_selection(self)
    }

    async fn apply_sink(&mut self, sink_id: &str) -> Result<()> {
        self.try_set_output_device(sink_id).await
    }
}

/// Default first, then communications, then by label and id.
pub fn sort_devices(devices: &mut Vec<OutputDevice>) {
    fn rank(device: &OutputDevice) -> u8 {
        match device.id.as_str() {
            DEFAULT_SINK => 0,
            COMMUNICATIONS_SINK => 1,
            _ => 2,
        }
    }
    devices.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.label.to_lowercase().cmp(&b.label.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut seen = HashSet::new();
    devices.retain(|d| seen.insert(d.id.clone()));
}

pub struct OutputDeviceManager {
    backend: Box<dyn DeviceBackend>,
    prefs: Arc<dyn PreferenceStore>,
    events: EventBus,
    known: Vec<OutputDevice>,
}

impl OutputDeviceManager {
    pub fn new(
        backend: Box<dyn DeviceBackend>,
        prefs: Arc<dyn PreferenceStore>,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            prefs,
            events,
            known: Vec::new(),
        }
    }

    pub fn supports_sink_selection(&self) -> bool {
        self.backend.supports_sink_selection()
    }

    /// Last successfully enumerated list.
    pub fn known_devices(&self) -> &[OutputDevice] {
        &self.known
    }

    /// Stored preference, or `"default"`.
    pub fn preferred_sink(&self) -> String {
        self.prefs
            .get(OUTPUT_DEVICE_KEY)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| DEFAULT_SINK.to_string())
    }

    async fn enumerate(&mut self) -> Vec<OutputDevice> {
        match self.backend.enumerate().await {
            Ok(mut devices) => {
                sort_devices(&mut devices);
                self.known = devices;
            }
            Err(e) => warn!(error = %e, "Device enumeration failed, using last known list"),
        }
        self.known.clone()
    }

    /// Clear a stored id that is absent from the known list. Returns it.
    fn clear_stale_preference(&self) -> Option<String> {
        let preferred = self.prefs.get(OUTPUT_DEVICE_KEY)?;
        if preferred == DEFAULT_SINK
            || self.known.is_empty()
            || self.known.iter().any(|d| d.id == preferred)
        {
            return None;
        }
        info!(sink_id = %preferred, "Preferred output device is gone, falling back to default");
        if let Err(e) = self.prefs.remove(OUTPUT_DEVICE_KEY) {
            warn!(error = %e, "Failed to clear stored output device");
        }
        Some(preferred)
    }

    /// Sorted, de-duplicated outputs. Enumeration errors yield the last
    /// known list. A stored id missing from the list is cleared.
    pub async fn list_outputs(&mut self) -> Vec<OutputDevice> {
        let devices = self.enumerate().await;
        self.clear_stale_preference();
        devices
    }

    /// Route to `sink_id` and persist it on success.
    ///
    /// Unknown ids resolve to `"default"`. Unsupported targets and apply
    /// failures emit `sinkchange` with `ok: false` and leave the stored
    /// preference alone.
    pub async fn set_sink_id(&mut self, target: &mut dyn SinkTarget, sink_id: &str) -> bool {
        let sink_id = match sink_id.trim() {
            "" => DEFAULT_SINK,
            id => id,
        };

        if !target.supports_sink_selection() {
            debug!(sink_id, "Output selection unsupported");
            self.emit_sink_change(sink_id, false, Some(Error::SinkUnsupported.to_string()));
            return false;
        }

        if self.known.is_empty() {
            self.enumerate().await;
        }
        if sink_id != DEFAULT_SINK
            && !self.known.is_empty()
            && !self.known.iter().any(|d| d.id == sink_id)
        {
            self.fall_back(target, sink_id).await;
            return false;
        }

        match target.apply_sink(sink_id).await {
            Ok(()) => {
                let stored = if sink_id == DEFAULT_SINK {
                    self.prefs.remove(OUTPUT_DEVICE_KEY)
                } else {
                    self.prefs.set(OUTPUT_DEVICE_KEY, sink_id)
                };
                if let Err(e) = stored {
                    warn!(error = %e, "Failed to persist output device");
                }
                info!(sink_id, "Output device selected");
                self.emit_sink_change(sink_id, true, None);
                true
            }
            Err(e) => {
                warn!(sink_id, error = %e, "Failed to apply output device");
                self.emit_sink_change(sink_id, false, Some(e.to_string()));
                false
            }
        }
    }

    /// Route to the default sink after `missing` disappeared.
    async fn fall_back(&mut self, target: &mut dyn SinkTarget, missing: &str) {
        if self.prefs.get(OUTPUT_DEVICE_KEY).is_some()
            && let Err(e) = self.prefs.remove(OUTPUT_DEVICE_KEY)
        {
            warn!(error = %e, "Failed to clear stored output device");
        }
        if target.supports_sink_selection()
            && let Err(e) = target.apply_sink(DEFAULT_SINK).await
        {
            warn!(error = %e, "Failed to route to default output");
        }
        let reason = Error::DeviceUnavailable(missing.to_string()).to_string();
        self.emit_sink_change(DEFAULT_SINK, true, Some(reason));
    }

    /// Handle a topology change (hot-plug/removal).
    ///
    /// Emits `deviceschanged` when the list differs from the last one and
    /// falls back when the preferred device vanished.
    pub async fn refresh(&mut self, target: &mut dyn SinkTarget) -> Vec<OutputDevice> {
        let before = self.known.clone();
        let devices = self.enumerate().await;
        if devices != before {
            debug!(count = devices.len(), "Output devices changed");
            self.events.emit(PlayerEvent::DevicesChanged {
                devices: devices.clone(),
            });
        }
        if let Some(stale) = self.clear_stale_preference() {
            self.fall_back(target, &stale).await;
        }
        devices
    }

    /// Startup: validate the stored choice and apply it.
    pub async fn reapply(&mut self, target: &mut dyn SinkTarget) -> String {
        self.enumerate().await;
        if let Some(stale) = self.clear_stale_preference() {
            self.fall_back(target, &stale).await;
            return DEFAULT_SINK.to_string();
        }
        let preferred = self.preferred_sink();
        if preferred != DEFAULT_SINK && target.supports_sink_selection() {
            self.set_sink_id(target, &preferred).await;
        }
        preferred
    }

    fn emit_sink_change(&self, sink_id: &str, ok: bool, error: Option<String>) {
        self.events.emit(PlayerEvent::SinkChange {
            sink_id: sink_id.to_string(),
            ok,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::prefs::MemoryPreferences;
    use crate::test_utils::{EventRecorder, MockDevices, MockSinkTarget};

    struct Fixture {
        devices: MockDevices,
        prefs: Arc<MemoryPreferences>,
        recorder: EventRecorder,
        manager: OutputDeviceManager,
    }

    fn fixture(devices: Vec<OutputDevice>) -> Fixture {
        let backend = MockDevices::new(devices);
        let prefs = Arc::new(MemoryPreferences::new());
        let bus = EventBus::new();
        let recorder = EventRecorder::attach(&bus);
        let manager = OutputDeviceManager::new(
            Box::new(backend.clone()),
            Arc::clone(&prefs) as Arc<dyn PreferenceStore>,
            bus,
        );
        Fixture {
            devices: backend,
            prefs,
            recorder,
            manager,
        }
    }

    fn standard_devices() -> Vec<OutputDevice> {
        vec![
            OutputDevice::new("usb-dac", "USB DAC"),
            OutputDevice::new(DEFAULT_SINK, "Default"),
            OutputDevice::new("hdmi", "HDMI Output"),
        ]
    }

    fn last_sink_change(recorder: &EventRecorder) -> Option<(String, bool, Option<String>)> {
        recorder.events().into_iter().rev().find_map(|e| match e {
            PlayerEvent::SinkChange { sink_id, ok, error } => Some((sink_id, ok, error)),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_list_outputs_sorted_and_deduped() {
        let mut f = fixture(vec![
            OutputDevice::new("b2", "Zeta Speakers"),
            OutputDevice::new(COMMUNICATIONS_SINK, "Communications"),
            OutputDevice::new("x", "alpha"),
            OutputDevice::new(DEFAULT_SINK, "Default"),
            OutputDevice::new("x", "alpha (duplicate)"),
            OutputDevice::new("c", ""),
        ]);

        let ids: Vec<String> = f.manager.list_outputs().await.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["default", "communications", "c", "x", "b2"]);
    }

    #[tokio::test]
    async fn test_enumeration_failure_returns_last_known() {
        let mut f = fixture(standard_devices());
        let first = f.manager.list_outputs().await;

        f.devices.fail(true);
        let second = f.manager.list_outputs().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_set_sink_persists_on_success() {
        let mut f = fixture(standard_devices());
        let mut target = MockSinkTarget::supported();

        assert!(f.manager.set_sink_id(&mut target, "usb-dac").await);

        assert_eq!(target.applied, vec!["usb-dac"]);
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY).as_deref(), Some("usb-dac"));
        assert_eq!(
            last_sink_change(&f.recorder),
            Some(("usb-dac".to_string(), true, None))
        );
    }

    #[tokio::test]
    async fn test_selecting_default_clears_override() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "hdmi").unwrap();
        let mut target = MockSinkTarget::supported();

        assert!(f.manager.set_sink_id(&mut target, DEFAULT_SINK).await);
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY), None);
        assert_eq!(f.manager.preferred_sink(), DEFAULT_SINK);
    }

    #[tokio::test]
    async fn test_unsupported_target_keeps_preference() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "hdmi").unwrap();
        let mut target = MockSinkTarget::unsupported();

        assert!(!f.manager.set_sink_id(&mut target, "usb-dac").await);

        assert!(target.applied.is_empty());
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY).as_deref(), Some("hdmi"));
        let (sink, ok, error) = last_sink_change(&f.recorder).unwrap();
        assert_eq!(sink, "usb-dac");
        assert!(!ok);
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_preference() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "hdmi").unwrap();
        let mut target = MockSinkTarget::failing();

        assert!(!f.manager.set_sink_id(&mut target, "usb-dac").await);

        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY).as_deref(), Some("hdmi"));
        let (_, ok, error) = last_sink_change(&f.recorder).unwrap();
        assert!(!ok);
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_id_falls_back_to_default() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "hdmi").unwrap();
        let mut target = MockSinkTarget::supported();

        assert!(!f.manager.set_sink_id(&mut target, "bluetooth").await);

        assert_eq!(target.applied, vec![DEFAULT_SINK]);
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY), None);
        let (sink, ok, error) = last_sink_change(&f.recorder).unwrap();
        assert_eq!(sink, DEFAULT_SINK);
        assert!(ok);
        assert!(error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_refresh_reports_changes_and_falls_back() {
        let mut f = fixture(standard_devices());
        let mut target = MockSinkTarget::supported();
        f.manager.set_sink_id(&mut target, "usb-dac").await;
        f.recorder.clear();

        // Same topology: nothing to report
        f.manager.refresh(&mut target).await;
        assert_eq!(f.recorder.count(EventKind::DevicesChanged), 0);

        // Unplug the DAC
        f.devices.set(vec![
            OutputDevice::new(DEFAULT_SINK, "Default"),
            OutputDevice::new("hdmi", "HDMI Output"),
        ]);
        let devices = f.manager.refresh(&mut target).await;

        assert_eq!(devices.len(), 2);
        assert_eq!(
            f.recorder.kinds(),
            vec![EventKind::DevicesChanged, EventKind::SinkChange]
        );
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY), None);
        assert_eq!(target.applied.last().map(String::as_str), Some(DEFAULT_SINK));
    }

    #[tokio::test]
    async fn test_list_outputs_clears_stale_preference() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "gone").unwrap();

        f.manager.list_outputs().await;
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY), None);
    }

    #[tokio::test]
    async fn test_enumeration_failure_never_clears_preference() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "usb-dac").unwrap();
        f.devices.fail(true);

        assert!(f.manager.list_outputs().await.is_empty());
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY).as_deref(), Some("usb-dac"));
    }

    #[tokio::test]
    async fn test_reapply_applies_stored_choice() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "hdmi").unwrap();
        let mut target = MockSinkTarget::supported();

        assert_eq!(f.manager.reapply(&mut target).await, "hdmi");
        assert_eq!(target.applied, vec!["hdmi"]);
    }

    #[tokio::test]
    async fn test_reapply_falls_back_for_vanished_device() {
        let mut f = fixture(standard_devices());
        f.prefs.set(OUTPUT_DEVICE_KEY, "old-headset").unwrap();
        let mut target = MockSinkTarget::supported();

        assert_eq!(f.manager.reapply(&mut target).await, DEFAULT_SINK);
        assert_eq!(f.prefs.get(OUTPUT_DEVICE_KEY), None);
        assert_eq!(target.applied, vec![DEFAULT_SINK]);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        assert_eq!(OutputDevice::new("abc", "").display_name(), "abc");
        assert_eq!(OutputDevice::new("abc", "Speakers").display_name(), "Speakers");
        assert!(OutputDevice::new(DEFAULT_SINK, "").is_default);
    }
}
