//! The processing graph.
//!
//! Fixed topology, rebuilt from an ordered list of optional stages:
//!
//! ```text
//! Source -> [Equalizer] -> [Limiter] -> MasterGain -> Destination
//!                                           \-> Analyser
//! ```
//!
//! Every rebuild disconnects all edges first, then reconnects the chain, so
//! toggling a stage can never leave a duplicate edge or drop the analyser
//! tap. DSP state survives rebuilds; only routing changes.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use super::analyser::{Analyser, SpectrumData};
use super::dsp::{Equalizer, Limiter};

/// Shared handle: written by the engine, rendered by the output callback.
pub type GraphHandle = Arc<Mutex<ProcessingGraph>>;

/// Graph node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Source,
    Equalizer,
    Limiter,
    MasterGain,
    Analyser,
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: NodeKind,
    pub to: NodeKind,
}

pub struct ProcessingGraph {
    sample_rate: u32,
    channels: usize,
    equalizer: Option<Box<dyn Equalizer>>,
    eq_enabled: bool,
    limiter: Limiter,
    limiter_enabled: bool,
    current_gain: f32,
    target_gain: f32,
    analyser: Analyser,
    mono: Vec<f32>,
    latest: Option<SpectrumData>,
    chain: Vec<NodeKind>,
    edges: Vec<Edge>,
    rebuilds: u64,
}

impl ProcessingGraph {
    pub fn new(equalizer: Option<Box<dyn Equalizer>>, fft_size: usize) -> Self {
        let mut graph = Self {
            sample_rate: 48_000,
            channels: 2,
            equalizer,
            eq_enabled: false,
            limiter: Limiter::new(48_000, 2),
            limiter_enabled: true,
            current_gain: 1.0,
            target_gain: 1.0,
            analyser: Analyser::new(fft_size),
            mono: Vec::new(),
            latest: None,
            chain: Vec::new(),
            edges: Vec::new(),
            rebuilds: 0,
        };
        graph.rebuild();
        graph
    }

    pub fn into_handle(self) -> GraphHandle {
        Arc::new(Mutex::new(self))
    }

    /// Adopt the output format negotiated by the audio context.
    pub fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate.max(1);
        self.channels = usize::from(channels.max(1));
        self.limiter.prepare(self.sample_rate, self.channels);
        if let Some(eq) = self.equalizer.as_mut() {
            eq.prepare(self.sample_rate, self.channels);
        }
        self.analyser.reset();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Disconnect everything, then reconnect the chain and the analyser tap.
    pub fn rebuild(&mut self) {
        self.edges.clear();

        let mut chain = vec![NodeKind::Source];
        if self.eq_enabled && self.equalizer.is_some() {
            chain.push(NodeKind::Equalizer);
        }
        if self.limiter_enabled {
            chain.push(NodeKind::Limiter);
        }
        chain.push(NodeKind::MasterGain);
        chain.push(NodeKind::Destination);

        for pair in chain.windows(2) {
            self.connect(pair[0], pair[1]);
        }
        self.connect(NodeKind::MasterGain, NodeKind::Analyser);

        self.chain = chain;
        self.rebuilds += 1;
    }

    fn connect(&mut self, from: NodeKind, to: NodeKind) {
        let edge = Edge { from, to };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Main chain from source to destination.
    pub fn route(&self) -> &[NodeKind] {
        &self.chain
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn has_analyser_tap(&self) -> bool {
        self.edges.contains(&Edge {
            from: NodeKind::MasterGain,
            to: NodeKind::Analyser,
        })
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn has_equalizer(&self) -> bool {
        self.equalizer.is_some()
    }

    /// Enable the EQ stage. Returns false when no equalizer was supplied.
    pub fn set_eq_enabled(&mut self, enabled: bool) -> bool {
        let Some(eq) = self.equalizer.as_mut() else {
            return false;
        };
        eq.set_bypassed(!enabled);
        if self.eq_enabled != enabled {
            self.eq_enabled = enabled;
            self.rebuild();
        }
        true
    }

    pub fn eq_enabled(&self) -> bool {
        self.eq_enabled
    }

    pub fn set_eq_gain(&mut self, band: usize, gain_db: f32) -> bool {
        match self.equalizer.as_mut() {
            Some(eq) if band < eq.band_count() => {
                eq.set_gain(band, gain_db);
                true
            }
            _ => false,
        }
    }

    pub fn eq_gain(&self, band: usize) -> Option<f32> {
        self.equalizer.as_ref()?.gain(band)
    }

    pub fn set_limiter_enabled(&mut self, enabled: bool) {
        if self.limiter_enabled != enabled {
            self.limiter_enabled = enabled;
            self.rebuild();
        }
    }

    pub fn limiter_enabled(&self) -> bool {
        self.limiter_enabled
    }

    /// Set the master gain target. The change is ramped over the next block.
    pub fn set_gain(&mut self, gain: f32) {
        self.target_gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
    }

    pub fn gain(&self) -> f32 {
        self.target_gain
    }

    /// Render one interleaved block through the current chain.
    pub fn process(&mut self, buffer: &mut [f32]) {
        let channels = self.channels;
        for node in &self.chain {
            match node {
                NodeKind::Equalizer => {
                    if let Some(eq) = self.equalizer.as_mut() {
                        eq.process(buffer);
                    }
                }
                NodeKind::Limiter => self.limiter.process(buffer),
                NodeKind::MasterGain => {
                    let frames = buffer.len() / channels;
                    let start = self.current_gain;
                    let step = if frames > 0 {
                        (self.target_gain - start) / frames as f32
                    } else {
                        0.0
                    };
                    for (i, frame) in buffer.chunks_exact_mut(channels).enumerate() {
                        let g = start + step * (i + 1) as f32;
                        frame.iter_mut().for_each(|s| *s *= g);
                    }
                    self.current_gain = self.target_gain;
                }
                NodeKind::Source | NodeKind::Analyser | NodeKind::Destination => {}
            }
        }

        if self.has_analyser_tap() {
            self.mono.clear();
            self.mono.extend(
                buffer
                    .chunks_exact(channels)
                    .map(|f| f.iter().sum::<f32>() / channels as f32),
            );
            if let Some(frame) = self.analyser.process(&self.mono) {
                self.latest = Some(frame);
            }
        }
    }

    /// Latest analyser frame (silence before the first full window).
    pub fn spectrum(&self) -> SpectrumData {
        self.latest.clone().unwrap_or_default()
    }
}
