//! Audio-callback side of the player

use super::session::{SharedSession, NO_SEEK};
use super::PlaybackMode;
use crate::config::db_to_gain;
use crate::oscillator::ApuSnapshot;
use crate::pitch::PitchInference;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Renders the active backend into the host's output buffer.
///
/// Created by [`Player::dispatcher`](super::Player::dispatcher). Scratch
/// buffers are sized once from the configured block length; larger host
/// buffers are rendered in several blocks, so [`render`](Self::render)
/// never allocates.
pub struct AudioDispatcher {
    session: Arc<SharedSession>,
    inference: PitchInference,
    block_frames: usize,
    pcm: Vec<i16>,
}

impl AudioDispatcher {
    pub(crate) fn new(session: Arc<SharedSession>, inference: PitchInference) -> Self {
        let block_frames = session.config.block_frames.max(1);
        Self {
            session,
            inference,
            block_frames,
            pcm: vec![0; block_frames * 2],
        }
    }

    /// Frames rendered per block.
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Sample rate the player was configured for.
    pub fn sample_rate(&self) -> u32 {
        self.session.config.sample_rate
    }

    /// True while the session is playing.
    pub fn is_playing(&self) -> bool {
        self.session.is_playing.load(Ordering::Acquire)
    }

    /// Fill `out` with interleaved stereo samples.
    ///
    /// Silence is written when nothing is loaded, playback is paused, or the
    /// backend fails to produce audio for a cycle.
    pub fn render(&mut self, out: &mut [f32]) {
        let block_len = self.block_frames * 2;
        for block in out.chunks_mut(block_len) {
            self.render_block(block);
        }
    }

    fn render_block(&mut self, out: &mut [f32]) {
        let session = &*self.session;
        if !session.is_playing.load(Ordering::Acquire) {
            out.fill(0.0);
            return;
        }

        let samples = out.len() & !1;
        let pcm = &mut self.pcm[..samples];

        let mut core = session.core.lock();
        let mode = core.mode;
        if mode == PlaybackMode::Chiptune {
            let target = session.seek_request.swap(NO_SEEK, Ordering::AcqRel);
            if target >= 0 {
                if let Some(deck) = core.chiptune.as_mut() {
                    // A failed seek keeps the current position.
                    deck.backend.seek(target).ok();
                }
            }
        }

        let Some(source) = core.active_source() else {
            out.fill(0.0);
            return;
        };

        // A decode error silences this cycle and publishes nothing.
        if !source.generate_audio(&mut out[..samples], pcm) {
            drop(core);
            out.fill(0.0);
            return;
        }
        let gain = source.output_gain(db_to_gain(session.volume_db.load()));
        let snapshot = source.oscillator_state();
        let position = source.position_seconds();
        let ended = source.has_ended();
        drop(core);

        if gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }
        out[samples..].fill(0.0);

        self.publish(&self.pcm[..samples], snapshot, position);
        session.playback_time.store(position as f32);

        if mode == PlaybackMode::Midi && ended {
            session.is_playing.store(false, Ordering::Release);
        }
    }

    fn publish(&self, pcm: &[i16], snapshot: Option<ApuSnapshot>, position: f64) {
        let session = &*self.session;

        #[cfg(feature = "visualization")]
        {
            if let Some(mut viz) = session.visualizer.try_lock() {
                viz.update_audio(pcm);
                if let Some(snapshot) = &snapshot {
                    viz.update_levels(snapshot);
                }
            }
        }
        #[cfg(not(feature = "visualization"))]
        let _ = pcm;

        if let Some(snapshot) = snapshot {
            if let Some(mut keyboard) = session.keyboard.try_lock() {
                keyboard.apply_readings(&self.inference.infer_snapshot(&snapshot), position);
            }
        }
    }
}
