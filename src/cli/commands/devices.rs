//! Output device listing.

use tokio::runtime::Runtime;

use super::open_preferences;
use crate::events::EventBus;
use crate::native::CpalDevices;
use crate::output::{OutputDevice, OutputDeviceManager};

/// Print the outputs, marking the stored preference with `*`.
pub fn cmd_devices(rt: &Runtime, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let mut manager =
            OutputDeviceManager::new(Box::new(CpalDevices::new()), open_preferences(), EventBus::new());
        let devices = manager.list_outputs().await;
        let preferred = manager.preferred_sink();

        if json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else {
            print!("{}", render_table(&devices, &preferred));
        }
        Ok(())
    })
}

fn render_table(devices: &[OutputDevice], preferred: &str) -> String {
    if devices.is_empty() {
        return "No output devices found.\n".to_string();
    }
    devices
        .iter()
        .map(|device| {
            let marker = if device.id == preferred { '*' } else { ' ' };
            if device.label == device.id || device.label.is_empty() {
                format!("{marker} {}\n", device.id)
            } else {
                format!("{marker} {:<24} {}\n", device.id, device.display_name())
            }
        })
        .collect()
}
