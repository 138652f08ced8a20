//! Queue inputs and run the playback loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};

use super::{expand_inputs, open_preferences};
use crate::config::Config;
use crate::controller::{PlaybackController, RepeatMode};
use crate::events::{EventBus, EventKind, PlayerEvent, Subscription};
use crate::native::{self, CpalDevices, HttpProbe};
use crate::output::OutputDeviceManager;
use crate::track::{ResourceRegistry, Track, TrackLoader};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEVICE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Command-line overrides for the `[playback]` and `[audio]` sections.
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    pub shuffle: bool,
    pub repeat: Option<RepeatMode>,
    pub volume: Option<f32>,
    pub device: Option<String>,
    pub autoplay_next: bool,
}

impl PlayOptions {
    /// Fold the flags into the loaded config. Flags only ever switch on.
    pub fn apply(&self, config: &mut Config) {
        config.playback.shuffle |= self.shuffle;
        if let Some(repeat) = self.repeat {
            config.playback.repeat = repeat;
        }
        if let Some(volume) = self.volume {
            config.audio.volume = volume;
        }
        if !self.autoplay_next {
            config.playback.autoplay_next = false;
        }
    }
}

/// Play everything in `inputs` until the queue finishes or Ctrl-C.
pub fn cmd_play(
    rt: &Runtime,
    mut config: Config,
    inputs: &[String],
    options: &PlayOptions,
) -> anyhow::Result<()> {
    options.apply(&mut config);

    rt.block_on(async {
        let resources = Arc::new(ResourceRegistry::new());
        let bus = EventBus::new();
        let loader = TrackLoader::new(
            Arc::clone(&resources),
            Arc::new(HttpProbe::new()),
            config.loader.clone(),
        );

        let tracks = load_tracks(&loader, inputs).await;
        if tracks.is_empty() {
            anyhow::bail!("Nothing playable in the given inputs");
        }
        println!("Queued {} track(s)", tracks.len());

        let engine = native::engine(
            Handle::current(),
            Arc::clone(&resources),
            bus.clone(),
            &config.audio,
        )?;
        let mut controller =
            PlaybackController::new(engine, Arc::clone(&resources), bus.clone(), &config.playback);
        let mut outputs =
            OutputDeviceManager::new(Box::new(CpalDevices::new()), open_preferences(), bus.clone());

        match &options.device {
            Some(device) => {
                if !outputs.set_sink_id(&mut controller, device).await {
                    eprintln!("Could not select output device {device:?}");
                }
            }
            None => {
                let sink = outputs.reapply(&mut controller).await;
                info!(sink = %sink, "Output device restored");
            }
        }

        let _subscriptions = print_events(&bus);
        controller.set_queue(tracks, 0).await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let mut devices = tokio::time::interval(DEVICE_REFRESH_INTERVAL);
        devices.tick().await;

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    if let Err(e) = result {
                        warn!(error = %e, "Ctrl-C handler failed");
                    }
                    println!("\nStopping.");
                    break;
                }
                _ = poll.tick() => {
                    controller.poll().await;
                    if controller.is_finished() {
                        println!("End of queue.");
                        break;
                    }
                }
                _ = devices.tick() => {
                    outputs.refresh(&mut controller).await;
                }
            }
        }

        controller.destroy().await;
        let stats = resources.stats();
        info!(
            live = stats.live,
            released = stats.released,
            "Released local resources"
        );
        Ok(())
    })
}

/// Resolve every input, skipping (and reporting) the ones that fail.
async fn load_tracks(loader: &TrackLoader, inputs: &[String]) -> Vec<Track> {
    let mut tracks = Vec::new();
    for input in expand_inputs(inputs) {
        match loader.load(&input).await {
            Ok(track) => tracks.push(track),
            Err(e) => {
                warn!(input = %input, error = %e, "Skipping input");
                eprintln!("Skipping {input}: {e}");
            }
        }
    }
    tracks
}

fn print_events(bus: &EventBus) -> Vec<Subscription> {
    vec![
        bus.on(EventKind::TrackChange, |event| {
            if let PlayerEvent::TrackChange {
                track: Some(track),
                index: Some(index),
                queue_length,
            } = event
            {
                println!(
                    "[{}/{}] {} ({})",
                    index + 1,
                    queue_length,
                    track.display_name(),
                    track.duration_label()
                );
            }
        }),
        bus.on(EventKind::Error, |event| {
            if let PlayerEvent::Error { error } = event {
                eprintln!("Playback error: {error}");
            }
        }),
        bus.on(EventKind::SinkChange, |event| {
            if let PlayerEvent::SinkChange {
                sink_id,
                ok,
                error,
            } = event
            {
                match error {
                    Some(error) if !ok => eprintln!("Output {sink_id} failed: {error}"),
                    Some(error) => println!("Output switched to {sink_id} ({error})"),
                    None => println!("Output: {sink_id}"),
                }
            }
        }),
    ]
}
