//! DSP stages for the processing graph: parametric EQ and lookahead limiter.
//!
//! Both stages work on interleaved `f32` frames with any channel count and
//! never allocate while processing.

/// ISO centre frequencies for the 10-band equalizer.
pub const EQ_BAND_FREQUENCIES: [f32; 10] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Band gain limit in dB (applies to boost and cut).
pub const MAX_BAND_GAIN_DB: f32 = 12.0;

/// Pluggable equalizer stage.
///
/// The engine owns one instance and inserts it at the head of the chain when
/// enabled; hosts can supply their own implementation.
pub trait Equalizer: Send {
    /// Called whenever the output format is (re)negotiated.
    fn prepare(&mut self, sample_rate: u32, channels: usize);

    fn band_count(&self) -> usize;

    /// Set a band's gain in dB. Out-of-range bands are ignored.
    fn set_gain(&mut self, band: usize, gain_db: f32);

    fn gain(&self, band: usize) -> Option<f32>;

    fn set_bypassed(&mut self, bypassed: bool);

    fn is_bypassed(&self) -> bool;

    /// Filter interleaved samples in place.
    fn process(&mut self, buffer: &mut [f32]);

    /// Clear filter memory.
    fn reset(&mut self);
}

// ============================================================================
// Biquad
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = out;
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// RBJ peaking filter.
    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        // Keep the centre safely below Nyquist on low-rate devices
        let freq = freq.min(sample_rate * 0.45);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

// ============================================================================
// Parametric EQ
// ============================================================================

/// 10-band peaking equalizer.
pub struct ParametricEq {
    sample_rate: f32,
    channels: usize,
    q: f32,
    gains_db: [f32; 10],
    coeffs: [BiquadCoeffs; 10],
    /// `states[band][channel]`
    states: Vec<Vec<BiquadState>>,
    bypassed: bool,
}

impl ParametricEq {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let mut eq = Self {
            sample_rate: sample_rate.max(1) as f32,
            channels: channels.max(1),
            q: std::f32::consts::SQRT_2,
            gains_db: [0.0; 10],
            coeffs: [BiquadCoeffs::IDENTITY; 10],
            states: Vec::new(),
            bypassed: false,
        };
        eq.reset();
        eq
    }

    fn update_band(&mut self, band: usize) {
        let gain = self.gains_db[band];
        self.coeffs[band] = if gain == 0.0 {
            BiquadCoeffs::IDENTITY
        } else {
            BiquadCoeffs::peaking(EQ_BAND_FREQUENCIES[band], gain, self.q, self.sample_rate)
        };
    }

    /// Whether every band is at 0 dB.
    pub fn is_flat(&self) -> bool {
        self.gains_db.iter().all(|g| *g == 0.0)
    }
}

impl Default for ParametricEq {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

impl Equalizer for ParametricEq {
    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.channels = channels.max(1);
        for band in 0..self.gains_db.len() {
            self.update_band(band);
        }
        self.reset();
    }

    fn band_count(&self) -> usize {
        self.gains_db.len()
    }

    fn set_gain(&mut self, band: usize, gain_db: f32) {
        if band >= self.gains_db.len() || !gain_db.is_finite() {
            return;
        }
        self.gains_db[band] = gain_db.clamp(-MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB);
        self.update_band(band);
    }

    fn gain(&self, band: usize) -> Option<f32> {
        self.gains_db.get(band).copied()
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    fn process(&mut self, buffer: &mut [f32]) {
        if self.bypassed || self.is_flat() {
            return;
        }
        let channels = self.channels;
        for frame in buffer.chunks_exact_mut(channels) {
            for (band, coeffs) in self.coeffs.iter().enumerate() {
                if self.gains_db[band] == 0.0 {
                    continue;
                }
                let states = &mut self.states[band];
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample = states[ch].process(*sample, coeffs);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.states = vec![vec![BiquadState::default(); self.channels]; self.gains_db.len()];
    }
}

// ============================================================================
// Lookahead limiter
// ============================================================================

/// Default ceiling in dBFS.
pub const LIMITER_THRESHOLD_DB: f32 = -1.0;

const LOOKAHEAD_SECS: f32 = 0.0015;
const RELEASE_SECS: f32 = 0.1;

/// Feed-forward lookahead peak limiter.
///
/// Audio is delayed by the lookahead window while a sliding-window minimum
/// of the per-frame target gain drives an attack/release envelope, so gain
/// reduction is in place before a peak leaves the delay line. Below the
/// threshold the output is the delayed input, unchanged.
pub struct Limiter {
    threshold: f32,
    channels: usize,
    lookahead: usize,
    /// Ring length in frames (lookahead + 1)
    ring_len: usize,
    /// Interleaved delay line, `ring_len * channels`
    delay: Vec<f32>,
    target_gains: Vec<f32>,
    write_pos: usize,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl Limiter {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self::with_threshold_db(LIMITER_THRESHOLD_DB, sample_rate, channels)
    }

    pub fn with_threshold_db(db: f32, sample_rate: u32, channels: usize) -> Self {
        let mut limiter = Self {
            threshold: 10.0_f32.powf(db / 20.0),
            channels: 1,
            lookahead: 1,
            ring_len: 2,
            delay: Vec::new(),
            target_gains: Vec::new(),
            write_pos: 0,
            gain: 1.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
        };
        limiter.prepare(sample_rate, channels);
        limiter
    }

    /// Resize for a new output format. Clears the delay line.
    pub fn prepare(&mut self, sample_rate: u32, channels: usize) {
        let rate = sample_rate.max(1) as f32;
        self.channels = channels.max(1);
        self.lookahead = ((LOOKAHEAD_SECS * rate).round() as usize).max(1);
        self.ring_len = self.lookahead + 1;
        // 99 % convergence within the lookahead window
        self.attack_coeff = (-4.605_17 / self.lookahead as f32).exp();
        self.release_coeff = (-1.0 / (RELEASE_SECS * rate)).exp();
        self.reset();
    }

    pub fn reset(&mut self) {
        self.delay = vec![0.0; self.ring_len * self.channels];
        self.target_gains = vec![1.0; self.ring_len];
        self.write_pos = 0;
        self.gain = 1.0;
    }

    /// Latency in frames.
    pub fn latency_frames(&self) -> usize {
        self.lookahead
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Current envelope gain (1.0 = no reduction).
    pub fn current_gain(&self) -> f32 {
        self.gain
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        let channels = self.channels;
        for frame in buffer.chunks_exact_mut(channels) {
            let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            self.target_gains[self.write_pos] = if peak > self.threshold {
                self.threshold / peak
            } else {
                1.0
            };

            let min_gain = self.target_gains.iter().copied().fold(1.0f32, f32::min);
            let coeff = if min_gain < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = self.gain * coeff + min_gain * (1.0 - coeff);

            let read_pos = (self.write_pos + 1) % self.ring_len;
            let read_base = read_pos * channels;
            let write_base = self.write_pos * channels;
            for (ch, sample) in frame.iter_mut().enumerate() {
                let delayed = self.delay[read_base + ch];
                self.delay[write_base + ch] = *sample;
                *sample = delayed * self.gain;
            }

            self.write_pos = read_pos;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, frames: usize, amp: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = ParametricEq::new(48_000, 1);
        let input = sine(440.0, 48_000, 1024, 0.5);
        let mut buffer = input.clone();
        eq.process(&mut buffer);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_eq_gain_is_clamped() {
        let mut eq = ParametricEq::default();
        eq.set_gain(3, 40.0);
        eq.set_gain(4, -40.0);
        eq.set_gain(99, 6.0);
        eq.set_gain(5, f32::NAN);
        assert_eq!(eq.gain(3), Some(MAX_BAND_GAIN_DB));
        assert_eq!(eq.gain(4), Some(-MAX_BAND_GAIN_DB));
        assert_eq!(eq.gain(5), Some(0.0));
        assert_eq!(eq.gain(99), None);
        assert_eq!(eq.band_count(), 10);
    }

    #[test]
    fn test_eq_boost_raises_band_energy() {
        let mut eq = ParametricEq::new(48_000, 1);
        eq.set_gain(5, 12.0); // 1 kHz
        let input = sine(1000.0, 48_000, 9600, 0.1);
        let mut buffer = input.clone();
        eq.process(&mut buffer);

        // Skip the filter's settling time
        let before = rms(&input[4800..]);
        let after = rms(&buffer[4800..]);
        assert!(after > before * 3.0, "after={after} before={before}");
    }

    #[test]
    fn test_eq_bypass() {
        let mut eq = ParametricEq::new(48_000, 2);
        eq.set_gain(0, 6.0);
        eq.set_bypassed(true);
        let input = sine(31.0, 48_000, 512, 0.3);
        let mut buffer = input.clone();
        eq.process(&mut buffer);
        assert_eq!(buffer, input);
        assert!(eq.is_bypassed());
    }

    #[test]
    fn test_limiter_below_threshold_is_delayed_passthrough() {
        let mut limiter = Limiter::new(48_000, 1);
        let latency = limiter.latency_frames();
        assert_eq!(latency, 72);

        let input = sine(440.0, 48_000, 2048, 0.5);
        let mut buffer = input.clone();
        limiter.process(&mut buffer);

        for i in latency..buffer.len() {
            assert!((buffer[i] - input[i - latency]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_limiter_caps_loud_signal() {
        let mut limiter = Limiter::new(48_000, 2);
        let mut buffer: Vec<f32> = sine(100.0, 48_000, 48_000, 2.0)
            .into_iter()
            .flat_map(|s| [s, -s])
            .collect();
        limiter.process(&mut buffer);

        let ceiling = limiter.threshold() * 1.02;
        // After the first 10 ms the envelope has settled
        let settled = &buffer[2 * 480..];
        let peak = settled.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak <= ceiling, "peak {peak} above ceiling {ceiling}");
        assert!(limiter.current_gain() < 1.0);
    }

    #[test]
    fn test_limiter_releases_after_peak() {
        let mut limiter = Limiter::new(48_000, 1);
        let mut loud = vec![1.5f32; 4800];
        limiter.process(&mut loud);
        let reduced = limiter.current_gain();

        let mut quiet = vec![0.1f32; 48_000];
        limiter.process(&mut quiet);
        assert!(limiter.current_gain() > reduced);
        assert!(limiter.current_gain() > 0.99);
    }
}
