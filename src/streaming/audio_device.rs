//! Audio device integration using rodio

use super::StreamConfig;
use crate::{AudioDispatcher, ChiprollError, Result};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rodio source pulling interleaved stereo from a dispatcher in batches.
struct DispatcherSource {
    dispatcher: AudioDispatcher,
    sample_rate: u32,
    finished: Arc<AtomicBool>,
    buffer: Vec<f32>,
    buffer_pos: usize,
}

impl DispatcherSource {
    fn new(
        dispatcher: AudioDispatcher,
        config: StreamConfig,
        finished: Arc<AtomicBool>,
    ) -> Self {
        let len = config.batch_frames.max(1) * 2;
        DispatcherSource {
            dispatcher,
            sample_rate: config.sample_rate,
            finished,
            buffer: vec![0.0f32; len],
            // Render on the first pull
            buffer_pos: len,
        }
    }
}

impl Source for DispatcherSource {
    fn current_frame_len(&self) -> Option<usize> {
        let remaining = self.buffer.len().saturating_sub(self.buffer_pos);
        Some(if remaining > 0 {
            remaining
        } else {
            self.buffer.len()
        })
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for DispatcherSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.buffer_pos >= self.buffer.len() {
            self.dispatcher.render(&mut self.buffer);
            self.buffer_pos = 0;
        }
        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start pulling from `dispatcher`.
    pub fn new(dispatcher: AudioDispatcher, config: StreamConfig) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| {
            ChiprollError::AudioDeviceError(format!("failed to create audio stream: {}", e))
        })?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| {
            ChiprollError::AudioDeviceError(format!("failed to create audio sink: {}", e))
        })?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(DispatcherSource::new(
            dispatcher,
            config,
            Arc::clone(&finished),
        ));

        Ok(AudioDevice {
            _stream: stream,
            sink,
            running: Arc::new(AtomicBool::new(true)),
            finished,
        })
    }

    /// Pause the device; the dispatcher is not called while paused.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume the device.
    pub fn play(&self) {
        self.sink.play();
    }

    /// Whether the device has not been dropped or finished.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// End the stream; the source stops yielding samples.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.pause();
        self.finish();
    }
}
