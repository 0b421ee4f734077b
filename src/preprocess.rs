//! Full-track preprocessing
//!
//! Builds the piano-roll timeline ahead of playback. For chiptunes the track
//! is simulated at full speed on a private backend instance: audio is
//! generated and thrown away because that is the only way to advance the
//! decoder, and the oscillator registers are sampled after every chunk. MIDI
//! sequences are segmented straight from their note events.

use crate::backend::ChiptuneLoader;
use crate::config::PreprocessConfig;
use crate::midi::{MidiEventKind, MidiSequence};
use crate::pitch::PitchInference;
use crate::roll::{MidiNoteTracker, NoteSegmenter, Timeline, TimelineSource};
use crate::sync::AtomicF32;
use crate::PreprocessError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Clears the in-progress flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Chiptune preprocessor with a single-run guard and pollable progress.
#[derive(Debug)]
pub struct TrackPreprocessor {
    running: AtomicBool,
    progress: AtomicF32,
    config: PreprocessConfig,
    inference: PitchInference,
    sample_rate: u32,
}

impl TrackPreprocessor {
    /// Preprocessor rendering at `sample_rate`.
    pub fn new(config: PreprocessConfig, inference: PitchInference, sample_rate: u32) -> Self {
        Self {
            running: AtomicBool::new(false),
            progress: AtomicF32::new(0.0),
            config,
            inference,
            sample_rate: sample_rate.max(1),
        }
    }

    /// True while a pass is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fraction of the last or current pass completed.
    pub fn progress(&self) -> f32 {
        self.progress.load()
    }

    /// Inference rules used by the pass.
    pub fn inference(&self) -> &PitchInference {
        &self.inference
    }

    fn acquire(&self) -> Result<RunGuard<'_>, PreprocessError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunGuard(&self.running))
            .map_err(|_| PreprocessError::AlreadyRunning)
    }

    /// Simulate `track` of `data` and return its note timeline.
    ///
    /// `progress_sink` receives a fraction every few chunks and always 1.0 at
    /// the end. Fails with [`PreprocessError::AlreadyRunning`] if another pass
    /// is in flight.
    pub fn preprocess_track(
        &self,
        loader: &dyn ChiptuneLoader,
        data: &[u8],
        track: usize,
        mut progress_sink: impl FnMut(f32),
    ) -> Result<Timeline, PreprocessError> {
        let _guard = self.acquire()?;
        self.progress.store(0.0);

        let mut backend = loader
            .open(data, self.sample_rate)
            .map_err(|e| PreprocessError::Open(e.to_string()))?;
        let track_info = backend
            .track_info(track)
            .map_err(|e| PreprocessError::TrackInfo {
                track,
                reason: e.to_string(),
            })?;
        let length = track_info
            .length_ms
            .filter(|&ms| ms > 0)
            .map_or(self.config.default_length_secs, |ms| ms as f64 / 1000.0)
            .min(self.config.horizon_secs);
        backend
            .start_track(track)
            .map_err(|e| PreprocessError::StartTrack {
                track,
                reason: e.to_string(),
            })?;

        info!(track, length_secs = length, "preprocessing track");

        let chunk_frames = self.config.chunk_frames.max(1);
        let interval = self.config.progress_interval.max(1);
        let step = chunk_frames as f64 / f64::from(self.sample_rate);
        let mut pcm = vec![0i16; chunk_frames * 2];
        let mut segmenter = NoteSegmenter::new();
        let mut time = 0.0;
        let mut chunks = 0usize;

        while time < length && !backend.track_ended() {
            if let Err(e) = backend.play(&mut pcm) {
                debug!(track, time, error = %e, "decoder stopped during preprocessing");
                break;
            }
            if let Some(snapshot) = backend.oscillators() {
                segmenter.observe_all(&self.inference.infer_snapshot(&snapshot), time);
            }
            time += step;
            chunks += 1;
            if chunks % interval == 0 {
                let fraction = (time / length).min(1.0) as f32;
                self.progress.store(fraction);
                progress_sink(fraction);
            }
        }

        let timeline = segmenter
            .finish(time)
            .with_source(TimelineSource::Track(track));
        self.progress.store(1.0);
        progress_sink(1.0);
        info!(
            track,
            notes = timeline.len(),
            seconds = time,
            "preprocessing finished"
        );
        Ok(timeline)
    }
}

/// Segment a MIDI sequence into a ready timeline.
pub fn midi_timeline(sequence: &MidiSequence) -> Timeline {
    let mut tracker = MidiNoteTracker::new();
    for event in sequence.events() {
        let time = event.time_secs();
        match event.kind {
            MidiEventKind::NoteOn {
                channel,
                key,
                velocity,
            } => tracker.note_on(channel, key, velocity, time),
            MidiEventKind::NoteOff { channel, key } => tracker.note_off(channel, key, time),
            _ => tracker.touch(time),
        }
    }
    let timeline = tracker.finish().with_source(TimelineSource::Midi);
    debug!(notes = timeline.len(), "midi timeline built");
    timeline
}
