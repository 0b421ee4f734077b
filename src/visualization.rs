//! Audio visualization sinks
//!
//! [`AudioVisualizer`] is fed from the audio callback with the raw PCM of each
//! cycle and the current oscillator snapshot. It keeps scope buffers, an FFT
//! spectrum with peak hold and a waterfall history, and per-channel level
//! meters. All buffers are sized at construction, so updates never allocate.
//!
//! # Example
//!
//! ```ignore
//! use chiproll::visualization::AudioVisualizer;
//!
//! let mut viz = AudioVisualizer::new();
//! viz.update_audio(&pcm_stereo_i16);
//! viz.update_levels(&snapshot);
//! let bars = viz.spectrum();
//! ```

use crate::backend::VoiceMask;
use crate::oscillator::{ApuChannel, ApuSnapshot, MAX_CHANNEL_COUNT};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

// ============================================================================
// Constants
// ============================================================================

/// Samples kept per scope buffer.
pub const WAVEFORM_SIZE: usize = 1024;

/// FFT length (power of two).
pub const FFT_SIZE: usize = 2048;

/// Bars in the spectrum display.
pub const SPECTRUM_BINS: usize = 64;

/// Rows kept for the waterfall display.
pub const HISTORY_SIZE: usize = 128;

/// Floor of the spectrum dB range; 0 dB maps to 1.0.
pub const SPECTRUM_FLOOR_DB: f32 = -60.0;

/// Default smoothing between successive spectra.
pub const SPECTRUM_SMOOTHING: f32 = 0.7;

/// Peak decay per 1/60 s.
pub const PEAK_DECAY: f32 = 0.95;

/// Decay of max-hold meters (pulse, noise, VRC6) per update.
pub const LEVEL_DECAY: f32 = 0.85;

/// Weight of history in averaged meters (triangle, DMC).
pub const LEVEL_AVERAGING: f32 = 0.95;

// ============================================================================
// Audio Visualizer
// ============================================================================

/// Scope, spectrum and level meters for the live output.
pub struct AudioVisualizer {
    mono: Vec<f32>,
    left: Vec<f32>,
    right: Vec<f32>,
    fft_input: Vec<f32>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buffer: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    spectrum: [f32; SPECTRUM_BINS],
    peaks: [f32; SPECTRUM_BINS],
    history: Vec<[f32; SPECTRUM_BINS]>,
    history_pos: usize,
    levels: [f32; MAX_CHANNEL_COUNT],
    level_peaks: [f32; MAX_CHANNEL_COUNT],
    smoothing: f32,
    expansion: bool,
    mute: VoiceMask,
}

impl Default for AudioVisualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioVisualizer {
    /// Create a visualizer with all buffers zeroed.
    pub fn new() -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE);
        let scratch_len = fft.get_inplace_scratch_len();
        let window = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (FFT_SIZE - 1) as f32).cos()))
            .collect();
        Self {
            mono: vec![0.0; WAVEFORM_SIZE],
            left: vec![0.0; WAVEFORM_SIZE],
            right: vec![0.0; WAVEFORM_SIZE],
            fft_input: vec![0.0; FFT_SIZE],
            window,
            fft,
            fft_buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            spectrum: [0.0; SPECTRUM_BINS],
            peaks: [0.0; SPECTRUM_BINS],
            history: vec![[0.0; SPECTRUM_BINS]; HISTORY_SIZE],
            history_pos: 0,
            levels: [0.0; MAX_CHANNEL_COUNT],
            level_peaks: [0.0; MAX_CHANNEL_COUNT],
            smoothing: SPECTRUM_SMOOTHING,
            expansion: false,
            mute: VoiceMask::empty(),
        }
    }

    /// Clear every buffer and meter; the mute mask is kept.
    pub fn reset(&mut self) {
        for buf in [&mut self.mono, &mut self.left, &mut self.right, &mut self.fft_input] {
            buf.fill(0.0);
        }
        self.spectrum = [0.0; SPECTRUM_BINS];
        self.peaks = [0.0; SPECTRUM_BINS];
        for row in self.history.iter_mut() {
            *row = [0.0; SPECTRUM_BINS];
        }
        self.history_pos = 0;
        self.levels = [0.0; MAX_CHANNEL_COUNT];
        self.level_peaks = [0.0; MAX_CHANNEL_COUNT];
    }

    /// Show or hide the VRC6 meters.
    pub fn set_expansion(&mut self, enabled: bool) {
        self.expansion = enabled;
    }

    /// Whether VRC6 meters are shown.
    pub fn has_expansion(&self) -> bool {
        self.expansion
    }

    /// Smoothing factor between spectra, `0.0..1.0`.
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 0.99);
    }

    /// Current smoothing factor.
    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Feed one cycle of interleaved stereo PCM.
    pub fn update_audio(&mut self, samples: &[i16]) {
        let frames = samples.len() / 2;
        if frames == 0 {
            return;
        }

        let shift = frames.min(WAVEFORM_SIZE);
        let first = frames - shift;
        for buf in [&mut self.mono, &mut self.left, &mut self.right] {
            buf.copy_within(shift.., 0);
        }
        for i in 0..shift {
            let l = f32::from(samples[(first + i) * 2]) / 32768.0;
            let r = f32::from(samples[(first + i) * 2 + 1]) / 32768.0;
            let dst = WAVEFORM_SIZE - shift + i;
            self.left[dst] = l;
            self.right[dst] = r;
            self.mono[dst] = (l + r) * 0.5;
        }

        let shift = frames.min(FFT_SIZE);
        let first = frames - shift;
        self.fft_input.copy_within(shift.., 0);
        for i in 0..shift {
            let l = f32::from(samples[(first + i) * 2]) / 32768.0;
            let r = f32::from(samples[(first + i) * 2 + 1]) / 32768.0;
            self.fft_input[FFT_SIZE - shift + i] = (l + r) * 0.5;
        }

        self.process_fft();
    }

    fn process_fft(&mut self) {
        for ((slot, x), w) in self
            .fft_buffer
            .iter_mut()
            .zip(self.fft_input.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(x * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.fft_scratch);

        // Full-scale sine through the Hann window peaks at N/4.
        let scale = 4.0 / FFT_SIZE as f32;
        let useful = FFT_SIZE / 2;
        for bin in 0..SPECTRUM_BINS {
            let (start, end) = bin_range(bin, useful);
            let sum: f32 = self.fft_buffer[start..end].iter().map(|c| c.norm()).sum();
            let magnitude = scale * sum / (end - start) as f32;
            let db = 20.0 * (magnitude + 1e-10).log10();
            let normalized = ((db - SPECTRUM_FLOOR_DB) / -SPECTRUM_FLOOR_DB).clamp(0.0, 1.0);
            let value = self.smoothing * self.spectrum[bin] + (1.0 - self.smoothing) * normalized;
            self.spectrum[bin] = value;
            if value > self.peaks[bin] {
                self.peaks[bin] = value;
            }
        }

        self.history[self.history_pos] = self.spectrum;
        self.history_pos = (self.history_pos + 1) % HISTORY_SIZE;
    }

    /// Update meters from an oscillator snapshot.
    pub fn update_levels(&mut self, snapshot: &ApuSnapshot) {
        for (idx, osc) in snapshot.base.iter().enumerate() {
            let amp = osc.amplitude.unsigned_abs() as f32;
            let active = osc.length > 0;
            let channel = ApuChannel::ALL[idx];
            let level = &mut self.levels[idx];
            match channel {
                // Triangle amplitude is the waveform step; DMC is the DAC level.
                ApuChannel::Triangle | ApuChannel::Dmc => {
                    let full_scale = if channel == ApuChannel::Dmc { 127.0 } else { 15.0 };
                    let target = if active { amp / full_scale } else { 0.0 };
                    *level = *level * LEVEL_AVERAGING + target * (1.0 - LEVEL_AVERAGING);
                }
                _ => {
                    let target = if active { amp / 15.0 } else { 0.0 };
                    *level = (*level * LEVEL_DECAY).max(target);
                }
            }
        }
        if let (true, Some(expansion)) = (self.expansion, &snapshot.expansion) {
            for (offset, osc) in expansion.iter().enumerate() {
                let idx = crate::oscillator::BASE_CHANNEL_COUNT + offset;
                let full_scale = if ApuChannel::ALL[idx] == ApuChannel::Vrc6Saw { 31.0 } else { 15.0 };
                let target = if osc.enabled {
                    (osc.volume.unsigned_abs() as f32 / full_scale).min(1.0)
                } else {
                    0.0
                };
                self.levels[idx] = (self.levels[idx] * LEVEL_DECAY).max(target);
            }
        }
        for (peak, level) in self.level_peaks.iter_mut().zip(self.levels.iter()) {
            if *level > *peak {
                *peak = *level;
            }
        }
    }

    /// Let spectrum and meter peaks fall; `delta_secs` is the UI frame time.
    pub fn decay_peaks(&mut self, delta_secs: f32) {
        let decay = PEAK_DECAY.powf(delta_secs * 60.0);
        for peak in self.peaks.iter_mut().chain(self.level_peaks.iter_mut()) {
            *peak *= decay;
        }
    }

    /// Mute or unmute one channel; returns the new mask.
    pub fn set_channel_mute(&mut self, channel: ApuChannel, mute: bool) -> VoiceMask {
        self.mute.set(VoiceMask::for_channel(channel.tag()), mute);
        self.mute
    }

    /// Whether a channel is muted.
    pub fn is_channel_muted(&self, channel: ApuChannel) -> bool {
        self.mute.contains(VoiceMask::for_channel(channel.tag()))
    }

    /// Current mute mask.
    pub fn mute_mask(&self) -> VoiceMask {
        self.mute
    }

    /// Mono scope, oldest sample first.
    pub fn waveform(&self) -> &[f32] {
        &self.mono
    }

    /// Left channel scope.
    pub fn waveform_left(&self) -> &[f32] {
        &self.left
    }

    /// Right channel scope.
    pub fn waveform_right(&self) -> &[f32] {
        &self.right
    }

    /// Spectrum bars in `0.0..=1.0`, bass first.
    pub fn spectrum(&self) -> &[f32; SPECTRUM_BINS] {
        &self.spectrum
    }

    /// Peak-hold values for the spectrum bars.
    pub fn spectrum_peaks(&self) -> &[f32; SPECTRUM_BINS] {
        &self.peaks
    }

    /// Waterfall rows, oldest first.
    pub fn waterfall(&self) -> impl Iterator<Item = &[f32; SPECTRUM_BINS]> + '_ {
        self.history[self.history_pos..]
            .iter()
            .chain(self.history[..self.history_pos].iter())
    }

    /// Meter level of one channel.
    pub fn channel_level(&self, channel: ApuChannel) -> f32 {
        self.levels[channel.tag() as usize]
    }

    /// Peak-hold level of one channel.
    pub fn channel_peak(&self, channel: ApuChannel) -> f32 {
        self.level_peaks[channel.tag() as usize]
    }
}

/// FFT bin range of a display bar; bars are spaced quadratically so bass
/// frequencies get more of them.
fn bin_range(bar: usize, useful: usize) -> (usize, usize) {
    let edge = |b: usize| {
        let t = b as f32 / SPECTRUM_BINS as f32;
        (t * t * useful as f32) as usize
    };
    let start = edge(bar).min(useful - 1);
    let mut end = edge(bar + 1).min(useful);
    if end <= start {
        end = start + 1;
    }
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::{ExpansionOscillatorState, OscillatorState};

    fn tone(freq: f32, start: usize, frames: usize) -> Vec<i16> {
        let mut pcm = Vec::with_capacity(frames * 2);
        for i in start..start + frames {
            let t = i as f64 / 44_100.0;
            let s = ((2.0 * std::f64::consts::PI * f64::from(freq) * t).sin() * 16_000.0) as i16;
            pcm.push(s);
            pcm.push(s);
        }
        pcm
    }

    #[test]
    fn test_bin_ranges_cover_half_spectrum() {
        let (first, _) = bin_range(0, FFT_SIZE / 2);
        let (_, last) = bin_range(SPECTRUM_BINS - 1, FFT_SIZE / 2);
        assert_eq!(first, 0);
        assert_eq!(last, FFT_SIZE / 2);
        for bar in 0..SPECTRUM_BINS {
            let (s, e) = bin_range(bar, FFT_SIZE / 2);
            assert!(e > s);
        }
    }

    #[test]
    fn test_scope_keeps_latest_frames() {
        let mut viz = AudioVisualizer::new();
        let pcm: Vec<i16> = (0..4).flat_map(|i| [i * 1000, -i * 1000]).collect();
        viz.update_audio(&pcm);
        let left = viz.waveform_left();
        assert_eq!(left[WAVEFORM_SIZE - 1], 3000.0 / 32768.0);
        assert_eq!(viz.waveform_right()[WAVEFORM_SIZE - 1], -3000.0 / 32768.0);
        assert_eq!(viz.waveform()[WAVEFORM_SIZE - 1], 0.0);
        assert_eq!(left[WAVEFORM_SIZE - 5], 0.0);
    }

    #[test]
    fn test_spectrum_peak_follows_tone() {
        let mut viz = AudioVisualizer::new();
        for chunk in 0..8 {
            viz.update_audio(&tone(1_000.0, chunk * 1024, 1024));
        }
        let spectrum = viz.spectrum();
        let loudest = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        // 1 kHz sits in FFT bin ~46 of 1024; sqrt(46/1024) * 64 ~= 13.6
        assert!((12..=15).contains(&loudest), "loudest bar {loudest}");
        assert!(viz.spectrum_peaks()[loudest] >= spectrum[loudest]);
        assert_eq!(viz.waterfall().count(), HISTORY_SIZE);
    }

    #[test]
    fn test_level_rules() {
        let mut viz = AudioVisualizer::new();
        let snap = ApuSnapshot::silent()
            .with_base(ApuChannel::Square1, OscillatorState::new(100, 5, 15))
            .with_base(ApuChannel::Triangle, OscillatorState::new(100, 5, 15))
            .with_base(ApuChannel::Dmc, OscillatorState::new(0, 0, 127));
        viz.update_levels(&snap);
        assert_eq!(viz.channel_level(ApuChannel::Square1), 1.0);
        assert!((viz.channel_level(ApuChannel::Triangle) - 0.05).abs() < 1e-6);
        // DMC with length 0 reads as idle regardless of its DAC level.
        assert_eq!(viz.channel_level(ApuChannel::Dmc), 0.0);

        viz.update_levels(&ApuSnapshot::silent());
        assert!((viz.channel_level(ApuChannel::Square1) - 0.85).abs() < 1e-6);
        assert_eq!(viz.channel_peak(ApuChannel::Square1), 1.0);
        viz.decay_peaks(1.0 / 60.0);
        assert!((viz.channel_peak(ApuChannel::Square1) - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_expansion_levels_only_when_enabled() {
        let mut viz = AudioVisualizer::new();
        let snap = ApuSnapshot::silent()
            .with_expansion(ApuChannel::Vrc6Saw, ExpansionOscillatorState::new(50, 62, true));
        viz.update_levels(&snap);
        assert_eq!(viz.channel_level(ApuChannel::Vrc6Saw), 0.0);
        viz.set_expansion(true);
        viz.update_levels(&snap);
        assert_eq!(viz.channel_level(ApuChannel::Vrc6Saw), 1.0);
    }

    #[test]
    fn test_mute_mask() {
        let mut viz = AudioVisualizer::new();
        let mask = viz.set_channel_mute(ApuChannel::Noise, true);
        assert_eq!(mask, VoiceMask::NOISE);
        assert!(viz.is_channel_muted(ApuChannel::Noise));
        viz.set_channel_mute(ApuChannel::Noise, false);
        assert!(viz.mute_mask().is_empty());
    }

    #[test]
    fn test_reset_keeps_mute() {
        let mut viz = AudioVisualizer::new();
        viz.set_channel_mute(ApuChannel::Dmc, true);
        viz.update_audio(&tone(440.0, 0, 512));
        viz.reset();
        assert!(viz.spectrum().iter().all(|&v| v == 0.0));
        assert!(viz.is_channel_muted(ApuChannel::Dmc));
    }
}
