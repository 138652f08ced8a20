//! Output enumeration on the default cpal host.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use tracing::debug;

use crate::error::{Error, Result};
use crate::output::{DEFAULT_SINK, DeviceBackend, OutputDevice};

/// Lists cpal output devices. Ids are device names, which is what
/// [`find_device`](super::output::find_device) matches on.
#[derive(Debug, Default)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl DeviceBackend for CpalDevices {
    async fn enumerate(&self) -> Result<Vec<OutputDevice>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let label = match &default_name {
            Some(name) => format!("System default ({name})"),
            None => "System default".to_string(),
        };
        let mut devices = vec![OutputDevice::new(DEFAULT_SINK, label)];

        let outputs = host
            .output_devices()
            .map_err(|e| Error::context_failure(e.to_string()))?;
        for device in outputs {
            let Ok(name) = device.name() else {
                continue;
            };
            // The pseudo-device already stands for the host default
            if name == DEFAULT_SINK || devices.iter().any(|d| d.id == name) {
                continue;
            }
            devices.push(OutputDevice::new(name.clone(), name));
        }

        debug!(host = ?host.id(), count = devices.len(), "Enumerated outputs");
        Ok(devices)
    }

    fn supports_sink_selection(&self) -> bool {
        true
    }
}
