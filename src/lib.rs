//! glasswave: a queue-driven audio playback core.
//!
//! The crate is layered bottom-up:
//! - [`track`]: turns files and URLs into immutable [`track::Track`]s
//! - [`output`]: enumerates sinks and remembers the preferred one
//! - [`engine`]: owns the media element, audio context and processing graph
//! - [`controller`]: queue, shuffle/repeat and auto-advance on top of the engine
//! - [`native`]: symphonia/cpal/reqwest implementations of the engine seams
//! - [`cli`]: composition root for the `glasswave` binary

pub mod cli;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod native;
pub mod output;
pub mod prefs;
pub mod track;
#[cfg(test)]
pub mod test_utils;
