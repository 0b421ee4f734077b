//! Offline export
//!
//! - WAV: render the dispatcher faster than real time into a 16-bit stereo
//!   file (`hound`)
//! - Note lists: write a timeline as CSV (`csv`) or JSON (`serde_json`)
//!
//! # Example
//!
//! ```no_run
//! use chiproll::export::{render_wav, write_notes_csv};
//! use chiproll::midi::{MidiSequence, ToneSynth};
//! use chiproll::{Player, PlayerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlayerConfig::default();
//! let player = Player::builder(config.clone())
//!     .synth(Box::new(ToneSynth::new(config.sample_rate)))
//!     .build();
//! player.load_midi(MidiSequence::from_smf(&std::fs::read("song.mid")?)?)?;
//! player.midi_play()?;
//!
//! let mut dispatcher = player.dispatcher();
//! render_wav(&mut dispatcher, "song.wav", 30.0)?;
//! write_notes_csv(&player.timeline().read(), "song.csv")?;
//! # Ok(())
//! # }
//! ```

mod notes;
mod wav;

pub use notes::{write_notes_csv, write_notes_json};
pub use wav::{render_wav, render_wav_with_config};

/// WAV rendering options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Scale the result so its peak sits at 0.95
    pub normalize: bool,
    /// Linear fade over the last seconds (0 = none)
    pub fade_out_duration: f32,
    /// Stop early once the dispatcher stops playing
    pub stop_at_end: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            normalize: false,
            fade_out_duration: 0.0,
            stop_at_end: true,
        }
    }
}

impl ExportConfig {
    /// Enable peak normalization.
    pub fn normalize(mut self, enable: bool) -> Self {
        self.normalize = enable;
        self
    }

    /// Add a fade at the end.
    pub fn fade_out(mut self, duration_seconds: f32) -> Self {
        self.fade_out_duration = duration_seconds.max(0.0);
        self
    }

    /// Keep rendering silence after playback stops.
    pub fn render_full_length(mut self) -> Self {
        self.stop_at_end = false;
        self
    }
}

/// Scale interleaved samples down so the peak is at most 0.95.
fn normalize_samples(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.95 {
        let scale = 0.95 / peak;
        for sample in samples.iter_mut() {
            *sample *= scale;
        }
    }
}

/// Fade the last `fade_duration` seconds of interleaved stereo to silence.
fn apply_fade_out(samples: &mut [f32], fade_duration: f32, sample_rate: u32) {
    if fade_duration <= 0.0 || samples.is_empty() {
        return;
    }
    let frames = samples.len() / 2;
    let fade_frames = ((fade_duration * sample_rate as f32).round() as usize).clamp(1, frames.max(1));
    let start = frames - fade_frames.min(frames);
    for (i, frame) in samples.chunks_exact_mut(2).enumerate().skip(start) {
        let factor = 1.0 - (i - start + 1) as f32 / fade_frames as f32;
        frame[0] *= factor;
        frame[1] *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_only_above_headroom() {
        let mut loud = vec![0.5, 1.5, -1.9, 0.8];
        normalize_samples(&mut loud);
        let peak = loud.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-6);

        let mut quiet = vec![0.1, -0.2];
        normalize_samples(&mut quiet);
        assert_eq!(quiet, vec![0.1, -0.2]);
    }

    #[test]
    fn test_fade_out_reaches_silence() {
        // 1000 frames of stereo, fade over the last 100.
        let mut samples = vec![1.0; 2000];
        apply_fade_out(&mut samples, 100.0 / 44_100.0, 44_100);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[2 * 899], 1.0);
        assert!(samples[2 * 950] < 1.0 && samples[2 * 950] > 0.0);
        assert_eq!(samples[1998], 0.0);
        assert_eq!(samples[1999], 0.0);
    }

    #[test]
    fn test_export_config_builder() {
        let config = ExportConfig::default()
            .normalize(true)
            .fade_out(2.0)
            .render_full_length();
        assert!(config.normalize);
        assert_eq!(config.fade_out_duration, 2.0);
        assert!(!config.stop_at_end);
    }
}
