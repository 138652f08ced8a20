//! Resolve one input and print its track descriptor.

use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::native::HttpProbe;
use crate::track::{ResourceRegistry, Track, TrackLoader};

pub fn cmd_probe(rt: &Runtime, config: &Config, input: &str, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let loader = TrackLoader::new(
            Arc::new(ResourceRegistry::new()),
            Arc::new(HttpProbe::new()),
            config.loader.clone(),
        );
        let track = loader.load(input).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&track)?);
        } else {
            print!("{}", describe(&track));
        }
        loader.release(&track);
        Ok(())
    })
}

fn describe(track: &Track) -> String {
    let mut out = format!("Title:    {}\n", track.title);
    if let Some(artist) = &track.artist {
        out.push_str(&format!("Artist:   {artist}\n"));
    }
    if let Some(album) = &track.album {
        out.push_str(&format!("Album:    {album}\n"));
    }
    out.push_str(&format!("Duration: {}\n", track.duration_label()));
    out.push_str(&format!(
        "Type:     {}\n",
        track.mime.as_deref().unwrap_or("unknown")
    ));
    let kind = match (track.is_local(), track.is_stream) {
        (true, _) => "local file",
        (false, true) => "remote stream",
        (false, false) => "remote file",
    };
    out.push_str(&format!("Source:   {kind}\n"));
    out
}
