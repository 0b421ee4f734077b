//! Player configuration
//!
//! Every tunable the player uses lives here so a front end can persist it as
//! JSON. Missing fields fall back to their defaults.

use crate::{ChiprollError, Result, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quietest master volume in dB.
pub const MIN_VOLUME_DB: f32 = -40.0;
/// Loudest master volume in dB.
pub const MAX_VOLUME_DB: f32 = 6.0;
/// Slowest chiptune tempo multiplier.
pub const MIN_TEMPO: f32 = 0.25;
/// Fastest chiptune tempo multiplier.
pub const MAX_TEMPO: f32 = 2.0;

/// Empirical constants used by pitch and velocity inference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Velocity reported for a gated triangle channel.
    pub triangle_velocity: f32,
    /// Velocity reported for a gated DMC channel.
    pub dmc_velocity: f32,
    /// MIDI note shown for DMC sample playback (28 = E1).
    pub dmc_note: u8,
    /// Divisor turning VRC6 saw volume into velocity.
    pub saw_headroom: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            triangle_velocity: 0.8,
            dmc_velocity: 0.8,
            dmc_note: 28,
            saw_headroom: 42.0,
        }
    }
}

/// Settings for the offline preprocessing pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Stereo frames generated per simulation step.
    pub chunk_frames: usize,
    /// Length assumed when the backend reports none, in seconds.
    pub default_length_secs: f64,
    /// Hard stop for the simulation, in seconds.
    pub horizon_secs: f64,
    /// Chunks between progress reports.
    pub progress_interval: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            default_length_secs: 180.0,
            horizon_secs: 300.0,
            progress_interval: 100,
        }
    }
}

/// Top-level player configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Largest block the dispatcher renders in one pass, in stereo frames.
    pub block_frames: usize,
    /// Master volume in dB.
    pub volume_db: f32,
    /// Chiptune tempo multiplier.
    pub tempo: f32,
    /// Run preprocessing on a worker thread instead of the caller's thread.
    pub background_preprocess: bool,
    /// Seconds of upcoming notes shown by the piano roll.
    pub roll_window_secs: f64,
    /// Lowest key drawn on the keyboard.
    pub lowest_key: u8,
    /// Highest key drawn on the keyboard.
    pub highest_key: u8,
    /// Inference constants.
    pub inference: InferenceConfig,
    /// Preprocessing settings.
    pub preprocess: PreprocessConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_frames: 1024,
            volume_db: 0.0,
            tempo: 1.0,
            background_preprocess: false,
            roll_window_secs: 3.0,
            lowest_key: 21,
            highest_key: 108,
            inference: InferenceConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Read a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(text)
            .map_err(|e| ChiprollError::ConfigError(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ChiprollError::ConfigError(format!("serialization failed: {}", e)))
    }

    /// Write the configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    /// Reject values the player cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ChiprollError::ConfigError("sample_rate must be non-zero".into()));
        }
        if self.block_frames == 0 || self.preprocess.chunk_frames == 0 {
            return Err(ChiprollError::ConfigError(
                "block_frames and chunk_frames must be non-zero".into(),
            ));
        }
        if self.preprocess.progress_interval == 0 {
            return Err(ChiprollError::ConfigError("progress_interval must be non-zero".into()));
        }
        if self.lowest_key > self.highest_key || self.highest_key > 127 {
            return Err(ChiprollError::ConfigError(format!(
                "invalid key range {}..={}",
                self.lowest_key, self.highest_key
            )));
        }
        if self.inference.saw_headroom <= 0.0 {
            return Err(ChiprollError::ConfigError("saw_headroom must be positive".into()));
        }
        Ok(())
    }
}

/// Decibels to linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlayerConfig::from_json(r#"{"sample_rate": 48000, "inference": {"dmc_note": 30}}"#)
            .unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.inference.dmc_note, 30);
        assert_eq!(config.inference.triangle_velocity, 0.8);
        assert_eq!(config.preprocess.chunk_frames, 1024);
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        assert!(PlayerConfig::from_json(r#"{"sample_rate": 0}"#).is_err());
    }

    #[test]
    fn test_rejects_inverted_key_range() {
        let result = PlayerConfig::from_json(r#"{"lowest_key": 90, "highest_key": 40}"#);
        assert!(matches!(result, Err(ChiprollError::ConfigError(_))));
    }

    #[test]
    fn test_json_roundtrip_preserves_values() {
        let config = PlayerConfig {
            volume_db: -6.0,
            background_preprocess: true,
            ..PlayerConfig::default()
        };
        let back = PlayerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_db_to_gain() {
        assert_relative_eq!(db_to_gain(0.0), 1.0);
        assert_relative_eq!(db_to_gain(-20.0), 0.1, epsilon = 1e-6);
        assert_relative_eq!(db_to_gain(6.0), 1.995_262_3, epsilon = 1e-5);
    }
}
