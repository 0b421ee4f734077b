//! State shared between the control thread and the audio callback

use super::deck::{ChiptuneDeck, HardwareDeck, MidiDeck, PlaybackSource};
use super::PlaybackMode;
use crate::backend::{ChiptuneLoader, VoiceMask};
use crate::config::PlayerConfig;
use crate::preprocess::TrackPreprocessor;
use crate::roll::{LiveKeyboard, SharedTimeline};
use crate::sync::AtomicF32;
#[cfg(feature = "visualization")]
use crate::visualization::AudioVisualizer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::Arc;

/// No seek pending.
pub(crate) const NO_SEEK: i64 = -1;

/// Latest preprocessing pass asked for on the background path.
#[derive(Clone)]
pub(crate) struct PreprocessRequest {
    pub data: Arc<[u8]>,
    pub track: usize,
    pub generation: u64,
}

/// Backend handles guarded by the session lock.
pub(crate) struct SessionCore {
    pub mode: PlaybackMode,
    pub chiptune: Option<ChiptuneDeck>,
    pub hardware: Option<HardwareDeck>,
    pub midi: Option<MidiDeck>,
    pub mute: VoiceMask,
}

impl SessionCore {
    /// The deck behind the current mode, if it has something loaded.
    pub fn active_source(&mut self) -> Option<&mut dyn PlaybackSource> {
        match self.mode {
            PlaybackMode::Idle => None,
            PlaybackMode::Chiptune => self
                .chiptune
                .as_mut()
                .map(|deck| deck as &mut dyn PlaybackSource),
            PlaybackMode::Hardware => self
                .hardware
                .as_mut()
                .filter(|deck| deck.loaded)
                .map(|deck| deck as &mut dyn PlaybackSource),
            PlaybackMode::Midi => self
                .midi
                .as_mut()
                .map(|deck| deck as &mut dyn PlaybackSource),
        }
    }
}

/// Everything one player instance shares across threads.
pub(crate) struct SharedSession {
    pub core: Mutex<SessionCore>,
    pub is_playing: AtomicBool,
    pub track_started: AtomicBool,
    pub seek_request: AtomicI64,
    pub playback_time: AtomicF32,
    pub volume_db: AtomicF32,
    pub tempo: AtomicF32,
    pub keyboard: Mutex<LiveKeyboard>,
    #[cfg(feature = "visualization")]
    pub visualizer: Mutex<AudioVisualizer>,
    pub timeline: SharedTimeline,
    pub preprocessor: TrackPreprocessor,
    pub pending_preprocess: Mutex<Option<PreprocessRequest>>,
    pub loader: Option<Arc<dyn ChiptuneLoader>>,
    pub config: PlayerConfig,
}

impl SharedSession {
    pub fn new(
        config: PlayerConfig,
        preprocessor: TrackPreprocessor,
        loader: Option<Arc<dyn ChiptuneLoader>>,
        hardware: Option<HardwareDeck>,
        midi: Option<MidiDeck>,
    ) -> Self {
        Self {
            core: Mutex::new(SessionCore {
                mode: PlaybackMode::Idle,
                chiptune: None,
                hardware,
                midi,
                mute: VoiceMask::empty(),
            }),
            is_playing: AtomicBool::new(false),
            track_started: AtomicBool::new(false),
            seek_request: AtomicI64::new(NO_SEEK),
            playback_time: AtomicF32::new(0.0),
            volume_db: AtomicF32::new(config.volume_db),
            tempo: AtomicF32::new(config.tempo),
            keyboard: Mutex::new(LiveKeyboard::new()),
            #[cfg(feature = "visualization")]
            visualizer: Mutex::new(AudioVisualizer::new()),
            timeline: SharedTimeline::new(),
            preprocessor,
            pending_preprocess: Mutex::new(None),
            loader,
            config,
        }
    }
}
