//! Rate conversion between the decoder and the output device.
//!
//! Playback rate is folded into the input rate: a 44.1 kHz source at
//! `rate = 2.0` is fed to the resampler as 88.2 kHz, so pitch follows rate.
//! Effective rates are rounded to 100 Hz to keep the FFT sizes small.

use rubato::{FftFixedIn, Resampler as _};

const CHUNK_FRAMES: usize = 1024;

/// Input rate the resampler sees for a source played at `playback_rate`.
pub fn effective_rate(source_rate: u32, playback_rate: f64) -> u32 {
    let scaled = f64::from(source_rate) * playback_rate;
    ((scaled / 100.0).round() as u32).max(1) * 100
}

/// Remap interleaved frames from `from` channels to `to` channels.
///
/// Mono output averages, mono input is duplicated, anything else wraps.
pub fn map_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = usize::from(from.max(1));
    let to = usize::from(to.max(1));
    if from == to {
        return samples.to_vec();
    }

    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|c| frame[c % from]));
        }
    }
    out
}

pub struct Resampler {
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Per-channel input waiting for a full chunk
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    /// If the effective input rate matches the output, samples pass through.
    pub fn new(source_rate: u32, playback_rate: f64, output_rate: u32, channels: u16) -> Self {
        let channels = usize::from(channels.max(1));
        let input_rate = if (playback_rate - 1.0).abs() < f64::EPSILON {
            source_rate
        } else {
            effective_rate(source_rate, playback_rate)
        };

        let inner = if input_rate == output_rate {
            None
        } else {
            match FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            ) {
                Ok(resampler) => {
                    tracing::debug!(input_rate, output_rate, channels, "Resampler configured");
                    Some(resampler)
                }
                Err(e) => {
                    tracing::warn!(error = %e, input_rate, output_rate, "Resampler unavailable, passing through");
                    None
                }
            }
        };

        Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::new(); channels],
        }
    }

    pub fn needs_resampling(&self) -> bool {
        self.inner.is_some()
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        f64::from(self.output_rate) / f64::from(self.input_rate)
    }

    /// Resample interleaved input; output may lag until a chunk fills.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return input.to_vec();
        };

        for (i, sample) in input.iter().enumerate() {
            self.pending[i % self.channels].push(*sample);
        }

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..needed).collect())
                .collect();
            match resampler.process(&chunk, None) {
                Ok(resampled) => interleave_into(&resampled, usize::MAX, &mut output),
                Err(e) => tracing::warn!(error = %e, "Resampling error"),
            }
        }
        output
    }

    /// Drain buffered input at end of stream.
    pub fn flush(&mut self) -> Vec<f32> {
        let ratio = self.ratio();
        let Some(resampler) = self.inner.as_mut() else {
            return Vec::new();
        };
        let remaining = self.pending[0].len();
        if remaining == 0 {
            return Vec::new();
        }

        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|ch| {
                let mut padded: Vec<f32> = ch.drain(..).collect();
                padded.resize(needed.max(remaining), 0.0);
                padded
            })
            .collect();

        let expected = (remaining as f64 * ratio).ceil() as usize;
        let mut output = Vec::new();
        match resampler.process(&chunk, None) {
            Ok(resampled) => interleave_into(&resampled, expected, &mut output),
            Err(e) => tracing::warn!(error = %e, "Resampling flush error"),
        }
        output
    }

    /// Drop buffered input (after a seek).
    pub fn reset(&mut self) {
        for ch in &mut self.pending {
            ch.clear();
        }
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

fn interleave_into(planes: &[Vec<f32>], max_frames: usize, out: &mut Vec<f32>) {
    let Some(first) = planes.first() else {
        return;
    };
    for frame in 0..first.len().min(max_frames) {
        out.extend(planes.iter().map(|plane| plane[frame]));
    }
}
