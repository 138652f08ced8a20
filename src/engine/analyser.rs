//! FFT analyser tapped off the master gain.
//!
//! Produces spectrum data for the visualizer and meters:
//! - log-spaced magnitude bands (0.0 - 1.0)
//! - peak/RMS levels since the previous frame
//! - a short downsampled waveform for oscilloscopes

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::Serialize;
use std::sync::Arc;

const DEFAULT_BANDS: usize = 32;
const WAVEFORM_POINTS: usize = 256;

/// One analysis frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumData {
    /// Magnitudes (0.0 - 1.0), lowest band first
    pub spectrum: Vec<f32>,
    pub bands: usize,
    pub peak_level: f32,
    pub rms_level: f32,
    pub waveform: Vec<f32>,
}

impl Default for SpectrumData {
    fn default() -> Self {
        Self {
            spectrum: vec![0.0; DEFAULT_BANDS],
            bands: DEFAULT_BANDS,
            peak_level: 0.0,
            rms_level: 0.0,
            waveform: Vec::new(),
        }
    }
}

/// Streaming FFT analyser over mono samples.
pub struct Analyser {
    fft: Arc<dyn RealToComplex<f32>>,
    fft_size: usize,
    input: Vec<f32>,
    input_pos: usize,
    windowed: Vec<f32>,
    output: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
    num_bands: usize,
    prev_spectrum: Vec<f32>,
    smoothing: f32,
    peak: f32,
    sum_sq: f32,
    level_count: usize,
}

impl Analyser {
    /// Create an analyser. The size is rounded up to a power of two in
    /// `64..=32768`.
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.clamp(64, 32768).next_power_of_two();
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let x = std::f32::consts::PI * 2.0 * i as f32 / (fft_size - 1) as f32;
                0.5 * (1.0 - x.cos())
            })
            .collect();

        let output = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();

        Self {
            fft,
            fft_size,
            input: vec![0.0; fft_size],
            input_pos: 0,
            windowed: vec![0.0; fft_size],
            output,
            scratch,
            window,
            num_bands: DEFAULT_BANDS,
            prev_spectrum: vec![0.0; DEFAULT_BANDS],
            smoothing: 0.7,
            peak: 0.0,
            sum_sq: 0.0,
            level_count: 0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Feed mono samples. Returns a frame each time the FFT window fills.
    pub fn process(&mut self, samples: &[f32]) -> Option<SpectrumData> {
        let mut frame = None;
        for &sample in samples {
            self.peak = self.peak.max(sample.abs());
            self.sum_sq += sample * sample;
            self.level_count += 1;

            self.input[self.input_pos] = sample;
            self.input_pos += 1;
            if self.input_pos >= self.fft_size {
                self.input_pos = 0;
                frame = self.analyse().or(frame);
            }
        }
        frame
    }

    fn analyse(&mut self) -> Option<SpectrumData> {
        for ((w, s), win) in self.windowed.iter_mut().zip(&self.input).zip(&self.window) {
            *w = s * win;
        }
        self.fft
            .process_with_scratch(&mut self.windowed, &mut self.output, &mut self.scratch)
            .ok()?;

        let rms = if self.level_count > 0 {
            (self.sum_sq / self.level_count as f32).sqrt()
        } else {
            0.0
        };
        let peak = self.peak;
        self.peak = 0.0;
        self.sum_sq = 0.0;
        self.level_count = 0;

        let step = (self.fft_size / WAVEFORM_POINTS).max(1);
        let waveform = self.input.iter().step_by(step).copied().collect();

        Some(SpectrumData {
            spectrum: self.compute_bands(),
            bands: self.num_bands,
            peak_level: peak.min(1.0),
            rms_level: rms.min(1.0),
            waveform,
        })
    }

    /// Quadratically spaced bands, in dB normalized over a 60 dB range,
    /// with exponential smoothing.
    fn compute_bands(&mut self) -> Vec<f32> {
        let bins = self.output.len();
        // Normalize so a full-scale sine lands near 0 dB
        let norm = 2.0 / self.fft_size as f32;
        let mut bands = vec![0.0f32; self.num_bands];

        for (band_idx, band) in bands.iter_mut().enumerate() {
            let low_ratio = (band_idx as f32 / self.num_bands as f32).powi(2);
            let high_ratio = ((band_idx + 1) as f32 / self.num_bands as f32).powi(2);
            let low_bin = (low_ratio * bins as f32) as usize;
            let high_bin = ((high_ratio * bins as f32).ceil() as usize).min(bins);
            if low_bin >= high_bin {
                continue;
            }

            let sum: f32 = self.output[low_bin..high_bin].iter().map(|c| c.norm()).sum();
            let avg = sum / (high_bin - low_bin) as f32 * norm;
            let db = if avg > 0.0 { 20.0 * avg.log10() } else { -60.0 };
            *band = ((db + 60.0) / 60.0).clamp(0.0, 1.0);
        }

        for (band, prev) in bands.iter_mut().zip(self.prev_spectrum.iter_mut()) {
            *band = *prev * self.smoothing + *band * (1.0 - self.smoothing);
            *prev = *band;
        }
        bands
    }

    /// Smoothing factor (0.0 = instant, 0.99 = nearly frozen).
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 0.99);
    }

    pub fn reset(&mut self) {
        self.input_pos = 0;
        self.input.fill(0.0);
        self.prev_spectrum.fill(0.0);
        self.peak = 0.0;
        self.sum_sq = 0.0;
        self.level_count = 0;
    }
}
