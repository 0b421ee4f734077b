//! Real-time audio output
//!
//! Plays an [`AudioDispatcher`](crate::AudioDispatcher) through the system
//! audio device. The device pulls samples from the dispatcher on rodio's
//! mixer thread, which makes that thread the audio callback.

mod audio_device;

pub use audio_device::AudioDevice;

/// Output stream settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Frames rendered per dispatcher call. Larger batches mean more latency
    /// but fewer calls into the session.
    pub batch_frames: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl StreamConfig {
    /// 512 frames per batch, about 12 ms at 44.1 kHz.
    pub fn low_latency(sample_rate: u32) -> Self {
        StreamConfig {
            batch_frames: 512,
            sample_rate,
        }
    }

    /// 2048 frames per batch, about 46 ms at 44.1 kHz.
    pub fn stable(sample_rate: u32) -> Self {
        StreamConfig {
            batch_frames: 2048,
            sample_rate,
        }
    }

    /// Latency of one batch in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        (self.batch_frames as f32 / self.sample_rate.max(1) as f32) * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::low_latency(crate::DEFAULT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency() {
        let config = StreamConfig::stable(44_100);
        assert!((config.latency_ms() - 46.44).abs() < 0.01);
        assert!(StreamConfig::default().latency_ms() < config.latency_ms());
    }
}
