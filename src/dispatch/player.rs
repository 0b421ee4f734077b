//! Control surface
//!
//! Every method here runs on the control thread. The session lock is taken
//! only to swap backend handles or step the emulator; preprocessing works on
//! its own backend instance and never holds it.

use super::deck::{ChiptuneDeck, HardwareDeck, MidiDeck, PlaybackSource};
use super::dispatcher::AudioDispatcher;
use super::session::{PreprocessRequest, SessionCore, SharedSession, NO_SEEK};
use super::PlaybackMode;
use crate::backend::ines::rom_has_expansion_audio;
use crate::backend::{
    Buttons, ChiptuneLoader, HardwareEmulator, MidiSynth, TrackInfo, VoiceMask,
};
use crate::config::{PlayerConfig, MAX_TEMPO, MAX_VOLUME_DB, MIN_TEMPO, MIN_VOLUME_DB};
use crate::midi::MidiSequence;
use crate::oscillator::ApuChannel;
use crate::pitch::PitchInference;
use crate::preprocess::{midi_timeline, TrackPreprocessor};
use crate::roll::{KeyboardLayout, LiveKeyboard, RollNote, SharedTimeline};
#[cfg(feature = "visualization")]
use crate::visualization::AudioVisualizer;
use crate::{ChiprollError, PreprocessError, Result};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Highest MIDI volume multiplier.
pub const MAX_MIDI_VOLUME: f32 = 2.0;

// ============================================================================
// Builder
// ============================================================================

/// Collects the backends a [`Player`] may use.
pub struct PlayerBuilder {
    config: PlayerConfig,
    loader: Option<Arc<dyn ChiptuneLoader>>,
    emulator: Option<Box<dyn HardwareEmulator>>,
    synth: Option<Box<dyn MidiSynth>>,
}

impl PlayerBuilder {
    /// Decoder factory for chiptune files.
    pub fn chiptune_loader(mut self, loader: Arc<dyn ChiptuneLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Console emulator for ROM images.
    pub fn emulator(mut self, emulator: Box<dyn HardwareEmulator>) -> Self {
        self.emulator = Some(emulator);
        self
    }

    /// Synth for MIDI sequences.
    pub fn synth(mut self, synth: Box<dyn MidiSynth>) -> Self {
        self.synth = Some(synth);
        self
    }

    /// Create the player. It starts idle.
    pub fn build(self) -> Player {
        let inference = PitchInference::new(self.config.inference);
        let preprocessor =
            TrackPreprocessor::new(self.config.preprocess, inference, self.config.sample_rate);
        let sample_rate = self.config.sample_rate;
        let session = SharedSession::new(
            self.config,
            preprocessor,
            self.loader,
            self.emulator.map(HardwareDeck::new),
            self.synth.map(|synth| MidiDeck::new(synth, sample_rate)),
        );
        Player {
            session: Arc::new(session),
            inference,
            workers: Mutex::new(Vec::new()),
        }
    }
}

// ============================================================================
// Player
// ============================================================================

/// Owns one playback session.
pub struct Player {
    session: Arc<SharedSession>,
    inference: PitchInference,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Player {
    /// Start configuring a player.
    pub fn builder(config: PlayerConfig) -> PlayerBuilder {
        PlayerBuilder {
            config,
            loader: None,
            emulator: None,
            synth: None,
        }
    }

    /// Audio-callback handle for this session.
    pub fn dispatcher(&self) -> AudioDispatcher {
        AudioDispatcher::new(Arc::clone(&self.session), self.inference)
    }

    /// Configuration the player was built with.
    pub fn config(&self) -> &PlayerConfig {
        &self.session.config
    }

    /// Active mode.
    pub fn mode(&self) -> PlaybackMode {
        self.session.core.lock().mode
    }

    fn require_mode(core: &SessionCore, mode: PlaybackMode) -> Result<()> {
        if core.mode == mode {
            Ok(())
        } else {
            Err(ChiprollError::WrongMode {
                expected: mode.name(),
            })
        }
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Load a chiptune file and return its track count.
    ///
    /// No track is started; call [`start_track`](Self::start_track) or
    /// [`play`](Self::play). On failure the session is left idle.
    pub fn load_chiptune(&self, data: &[u8]) -> Result<usize> {
        self.unload();
        let loader = self
            .session
            .loader
            .clone()
            .ok_or(ChiprollError::BackendUnavailable("chiptune"))?;
        let backend = loader
            .open(data, self.session.config.sample_rate)
            .map_err(|e| {
                warn!(error = %e, "chiptune load failed");
                ChiprollError::LoadError(e.to_string())
            })?;

        let deck = ChiptuneDeck::new(backend, Arc::from(data));
        let tracks = deck.track_count;
        {
            let mut core = self.session.core.lock();
            core.chiptune = Some(deck);
            core.mode = PlaybackMode::Chiptune;
        }
        info!(bytes = data.len(), tracks, "chiptune loaded");
        Ok(tracks)
    }

    /// Load a ROM image into the emulator and start running it.
    pub fn load_rom(&self, rom: &[u8]) -> Result<()> {
        self.unload();
        let expansion = rom_has_expansion_audio(rom);
        {
            let mut core = self.session.core.lock();
            let deck = core
                .hardware
                .as_mut()
                .ok_or(ChiprollError::BackendUnavailable("hardware"))?;
            deck.emulator.load(rom).map_err(|e| {
                warn!(error = %e, "ROM load failed");
                ChiprollError::LoadError(e.to_string())
            })?;
            deck.loaded = true;
            deck.expansion = expansion;
            core.mode = PlaybackMode::Hardware;
        }
        self.reset_sinks(KeyboardLayout::Nes { expansion }, expansion);
        self.session.is_playing.store(true, Ordering::Release);
        info!(bytes = rom.len(), expansion, "ROM loaded");
        Ok(())
    }

    /// Load a MIDI sequence. Its timeline is built immediately.
    pub fn load_midi(&self, sequence: MidiSequence) -> Result<()> {
        self.unload();
        let timeline = midi_timeline(&sequence);
        let events = sequence.len();
        {
            let mut core = self.session.core.lock();
            let deck = core
                .midi
                .as_mut()
                .ok_or(ChiprollError::BackendUnavailable("midi"))?;
            deck.load(sequence);
            core.mode = PlaybackMode::Midi;
        }
        let generation = self.session.timeline.begin_generation();
        self.session.timeline.install(generation, timeline);
        self.reset_sinks(KeyboardLayout::Midi, false);
        info!(events, "MIDI sequence loaded");
        Ok(())
    }

    /// Replace the MIDI synth. A loaded sequence restarts from the top.
    pub fn set_synth(&self, synth: Box<dyn MidiSynth>) {
        let mut core = self.session.core.lock();
        let sample_rate = self.session.config.sample_rate;
        match core.midi.as_mut() {
            Some(deck) => {
                deck.synth = synth;
                deck.rewind();
            }
            None => core.midi = Some(MidiDeck::new(synth, sample_rate)),
        }
    }

    /// Drop whatever is loaded and go idle. Backends supplied at build time
    /// are kept for the next load.
    pub fn unload(&self) {
        self.session.is_playing.store(false, Ordering::Release);
        self.session.track_started.store(false, Ordering::Release);
        self.session.seek_request.store(NO_SEEK, Ordering::Release);
        self.session.playback_time.store(0.0);
        {
            let mut core = self.session.core.lock();
            core.mode = PlaybackMode::Idle;
            core.chiptune = None;
            if let Some(deck) = core.hardware.as_mut() {
                deck.loaded = false;
                deck.expansion = false;
            }
            if let Some(deck) = core.midi.as_mut() {
                deck.load(MidiSequence::default());
            }
        }
        *self.session.pending_preprocess.lock() = None;
        self.session.timeline.begin_generation();
        self.session.keyboard.lock().all_notes_off();
        #[cfg(feature = "visualization")]
        self.session.visualizer.lock().reset();
    }

    fn reset_sinks(&self, layout: KeyboardLayout, expansion: bool) {
        self.session.keyboard.lock().set_layout(layout);
        #[cfg(feature = "visualization")]
        {
            let mut viz = self.session.visualizer.lock();
            viz.reset();
            viz.set_expansion(expansion);
        }
        #[cfg(not(feature = "visualization"))]
        let _ = expansion;
    }

    // ------------------------------------------------------------------------
    // Chiptune transport
    // ------------------------------------------------------------------------

    /// Preprocess `track` and start playing it.
    ///
    /// A preprocessing failure only leaves the timeline empty; the live
    /// keyboard keeps working. Starting the track itself can fail.
    pub fn start_track(&self, track: usize) -> Result<()> {
        let data = {
            let core = self.session.core.lock();
            Self::require_mode(&core, PlaybackMode::Chiptune)?;
            let deck = core
                .chiptune
                .as_ref()
                .ok_or(ChiprollError::WrongMode { expected: "chiptune" })?;
            if track >= deck.track_count {
                return Err(ChiprollError::BackendError(format!(
                    "track {} out of range (0..{})",
                    track, deck.track_count
                )));
            }
            Arc::clone(&deck.data)
        };

        self.preprocess(data, track);
        self.safe_start_track(track)
    }

    fn preprocess(&self, data: Arc<[u8]>, track: usize) {
        let generation = self.session.timeline.begin_generation();
        if self.session.config.background_preprocess {
            *self.session.pending_preprocess.lock() = Some(PreprocessRequest {
                data,
                track,
                generation,
            });
            let session = Arc::clone(&self.session);
            let handle = std::thread::spawn(move || drain_preprocess_requests(&session));
            let mut workers = self.workers.lock();
            workers.retain(|worker| !worker.is_finished());
            workers.push(handle);
        } else {
            run_preprocess(&self.session, &data, track, generation);
        }
    }

    fn safe_start_track(&self, track: usize) -> Result<()> {
        let tempo = f64::from(self.session.tempo.load());
        let expansion = {
            let mut core = self.session.core.lock();
            Self::require_mode(&core, PlaybackMode::Chiptune)?;
            let mute = core.mute;
            let deck = core
                .chiptune
                .as_mut()
                .ok_or(ChiprollError::WrongMode { expected: "chiptune" })?;
            deck.start(track, tempo, mute).map_err(|e| {
                warn!(track, error = %e, "could not start track");
                ChiprollError::BackendError(e.to_string())
            })?;
            deck.backend
                .oscillators()
                .is_some_and(|snapshot| snapshot.expansion.is_some())
        };

        self.session.seek_request.store(NO_SEEK, Ordering::Release);
        self.session.playback_time.store(0.0);
        self.reset_sinks(KeyboardLayout::Nes { expansion }, expansion);
        self.session.track_started.store(true, Ordering::Release);
        self.session.is_playing.store(true, Ordering::Release);
        info!(track, "track started");
        Ok(())
    }

    /// Start or resume whatever is loaded.
    pub fn play(&self) -> Result<()> {
        match self.mode() {
            PlaybackMode::Idle => Err(ChiprollError::LoadError("nothing loaded".into())),
            PlaybackMode::Chiptune if !self.session.track_started.load(Ordering::Acquire) => {
                self.start_track(0)
            }
            PlaybackMode::Midi => self.midi_play(),
            PlaybackMode::Chiptune | PlaybackMode::Hardware => {
                self.session.is_playing.store(true, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Pause without moving the position.
    pub fn pause(&self) {
        self.session.is_playing.store(false, Ordering::Release);
    }

    /// Play if paused, pause if playing.
    pub fn toggle_play(&self) -> Result<()> {
        if self.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Stop; the next resume starts from the top of the track.
    pub fn stop(&self) {
        self.session.is_playing.store(false, Ordering::Release);
        self.session.seek_request.store(0, Ordering::Release);
        self.session.playback_time.store(0.0);
        self.session.keyboard.lock().all_notes_off();
    }

    /// Advance to the next track. Returns false on the last track.
    pub fn next_track(&self) -> Result<bool> {
        let (track, count) = self.track_position()?;
        if track + 1 >= count {
            return Ok(false);
        }
        self.start_track(track + 1)?;
        Ok(true)
    }

    /// Go back one track; the first track restarts.
    pub fn prev_track(&self) -> Result<()> {
        let (track, _) = self.track_position()?;
        self.start_track(track.saturating_sub(1))
    }

    fn track_position(&self) -> Result<(usize, usize)> {
        let core = self.session.core.lock();
        Self::require_mode(&core, PlaybackMode::Chiptune)?;
        core.chiptune
            .as_ref()
            .map(|deck| (deck.track, deck.track_count))
            .ok_or(ChiprollError::WrongMode { expected: "chiptune" })
    }

    /// Ask the audio callback to seek. Only the latest request before the
    /// next cycle is applied.
    pub fn request_seek(&self, position_ms: i64) {
        self.session
            .seek_request
            .store(position_ms.max(0), Ordering::Release);
    }

    /// Current track and the number of tracks.
    pub fn current_track(&self) -> Option<(usize, usize)> {
        self.track_position().ok()
    }

    /// Metadata of one track.
    pub fn track_info(&self, track: usize) -> Result<TrackInfo> {
        let core = self.session.core.lock();
        Self::require_mode(&core, PlaybackMode::Chiptune)?;
        core.chiptune
            .as_ref()
            .ok_or(ChiprollError::WrongMode { expected: "chiptune" })?
            .backend
            .track_info(track)
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    /// Master volume in dB, clamped to the supported range.
    pub fn set_volume_db(&self, db: f32) {
        self.session
            .volume_db
            .store(db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB));
    }

    /// Master volume in dB.
    pub fn volume_db(&self) -> f32 {
        self.session.volume_db.load()
    }

    /// Chiptune playback speed, clamped to the supported range.
    pub fn set_tempo(&self, tempo: f32) {
        let tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.session.tempo.store(tempo);
        if let Some(deck) = self.session.core.lock().chiptune.as_mut() {
            deck.backend.set_tempo(f64::from(tempo));
        }
    }

    /// Chiptune playback speed.
    pub fn tempo(&self) -> f32 {
        self.session.tempo.load()
    }

    /// Mute or unmute one channel of the chiptune decoder; returns the new
    /// mask.
    pub fn set_channel_mute(&self, channel: ApuChannel, mute: bool) -> VoiceMask {
        let mask = {
            let mut core = self.session.core.lock();
            core.mute.set(VoiceMask::for_channel(channel.tag()), mute);
            let mask = core.mute;
            if let Some(deck) = core.chiptune.as_mut() {
                deck.backend.mute_voices(mask);
            }
            mask
        };
        #[cfg(feature = "visualization")]
        self.session.visualizer.lock().set_channel_mute(channel, mute);
        mask
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Housekeeping to call regularly from the control thread.
    ///
    /// Advances to the next track when the current one has ended, stopping
    /// after the last. In MIDI mode the live keyboard follows the timeline.
    pub fn poll(&self) -> Result<()> {
        match self.mode() {
            PlaybackMode::Chiptune => {
                if !self.is_playing() || !self.session.track_started.load(Ordering::Acquire) {
                    return Ok(());
                }
                let ended = self
                    .session
                    .core
                    .lock()
                    .chiptune
                    .as_ref()
                    .is_some_and(|deck| deck.has_ended());
                if ended {
                    info!("track ended, advancing");
                    if !self.next_track()? {
                        info!("end of track list");
                        self.stop();
                    }
                }
            }
            PlaybackMode::Midi => {
                let time = self.playback_time();
                let timeline = self.session.timeline.read();
                self.session.keyboard.lock().sync_to_timeline(&timeline, time);
            }
            PlaybackMode::Idle | PlaybackMode::Hardware => {}
        }
        Ok(())
    }

    /// True while the callback is producing sound.
    pub fn is_playing(&self) -> bool {
        self.session.is_playing.load(Ordering::Acquire)
    }

    /// Elapsed time reported by the active backend, in seconds.
    pub fn playback_time(&self) -> f64 {
        f64::from(self.session.playback_time.load())
    }

    /// Shared handle to the note timeline.
    pub fn timeline(&self) -> SharedTimeline {
        self.session.timeline.clone()
    }

    /// Copy of the live keyboard.
    pub fn keyboard(&self) -> LiveKeyboard {
        self.session.keyboard.lock().clone()
    }

    /// Lock the visualizer for reading. Hold it briefly; the callback skips
    /// its update while it is held.
    #[cfg(feature = "visualization")]
    pub fn visualizer(&self) -> parking_lot::MutexGuard<'_, AudioVisualizer> {
        self.session.visualizer.lock()
    }

    /// Notes in the piano-roll window at the current position.
    pub fn visible_notes(&self) -> Vec<RollNote> {
        let config = &self.session.config;
        self.session
            .timeline
            .read()
            .window(
                self.playback_time(),
                config.roll_window_secs,
                config.lowest_key,
                config.highest_key,
            )
            .copied()
            .collect()
    }

    /// Progress of the current or last preprocessing pass.
    pub fn preprocess_progress(&self) -> f32 {
        self.session.preprocessor.progress()
    }

    /// True while a preprocessing pass runs.
    pub fn is_preprocessing(&self) -> bool {
        self.session.preprocessor.is_running()
    }

    /// Block until every background preprocessing worker has finished.
    pub fn wait_for_preprocess(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                warn!("preprocessing worker panicked");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Emulator
    // ------------------------------------------------------------------------

    fn with_hardware<T>(&self, f: impl FnOnce(&mut HardwareDeck) -> Result<T>) -> Result<T> {
        let mut core = self.session.core.lock();
        Self::require_mode(&core, PlaybackMode::Hardware)?;
        match core.hardware.as_mut() {
            Some(deck) if deck.loaded => f(deck),
            _ => Err(ChiprollError::WrongMode { expected: "hardware" }),
        }
    }

    /// Step the emulator by one video frame; does nothing while paused.
    pub fn run_emulator_frame(&self) -> Result<()> {
        let running = self.is_playing();
        self.with_hardware(|deck| {
            if running {
                deck.emulator.run_frame();
            }
            Ok(())
        })
    }

    /// Pause the emulator.
    pub fn pause_emulator(&self) -> Result<()> {
        self.with_hardware(|_| Ok(()))?;
        self.pause();
        Ok(())
    }

    /// Resume the emulator.
    pub fn resume_emulator(&self) -> Result<()> {
        self.with_hardware(|_| Ok(()))?;
        self.session.is_playing.store(true, Ordering::Release);
        Ok(())
    }

    /// Power-cycle the console.
    pub fn reset_emulator(&self) -> Result<()> {
        self.with_hardware(|deck| {
            deck.emulator.reset();
            Ok(())
        })?;
        self.session.keyboard.lock().all_notes_off();
        Ok(())
    }

    /// Controller state for `player` (0 or 1).
    pub fn set_input(&self, player: usize, buttons: Buttons) -> Result<()> {
        self.with_hardware(|deck| {
            deck.emulator.set_input(player, buttons);
            Ok(())
        })
    }

    /// Serialize the emulator.
    pub fn save_state(&self) -> Result<Vec<u8>> {
        self.with_hardware(|deck| deck.emulator.save_state())
    }

    /// Restore a state from [`save_state`](Self::save_state).
    pub fn load_state(&self, state: &[u8]) -> Result<()> {
        self.with_hardware(|deck| deck.emulator.load_state(state))
    }

    // ------------------------------------------------------------------------
    // MIDI
    // ------------------------------------------------------------------------

    fn with_midi<T>(&self, f: impl FnOnce(&mut MidiDeck) -> T) -> Result<T> {
        let mut core = self.session.core.lock();
        Self::require_mode(&core, PlaybackMode::Midi)?;
        core.midi
            .as_mut()
            .map(f)
            .ok_or(ChiprollError::BackendUnavailable("midi"))
    }

    /// Start or resume the sequence; a finished sequence starts over.
    pub fn midi_play(&self) -> Result<()> {
        let restarted = self.with_midi(|deck| {
            let ended = deck.has_ended();
            if ended {
                deck.rewind();
            }
            ended
        })?;
        if restarted {
            self.session.playback_time.store(0.0);
        }
        self.session.is_playing.store(true, Ordering::Release);
        Ok(())
    }

    /// Pause the sequence.
    pub fn midi_pause(&self) -> Result<()> {
        self.with_midi(|_| ())?;
        self.pause();
        Ok(())
    }

    /// Back to the start with every note released.
    pub fn midi_rewind(&self) -> Result<()> {
        self.with_midi(MidiDeck::rewind)?;
        self.session.playback_time.store(0.0);
        self.session.keyboard.lock().all_notes_off();
        Ok(())
    }

    /// Output multiplier for MIDI playback, `0.0..=2.0`.
    pub fn set_midi_volume(&self, volume: f32) -> Result<()> {
        self.with_midi(|deck| deck.volume = volume.clamp(0.0, MAX_MIDI_VOLUME))
    }

    /// Tempo of the sequence at the playback position.
    pub fn midi_bpm(&self) -> Result<f64> {
        self.with_midi(|deck| deck.bpm)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.wait_for_preprocess();
    }
}

/// Run one pass; false when another pass held the preprocessor.
fn run_preprocess(session: &SharedSession, data: &[u8], track: usize, generation: u64) -> bool {
    let Some(loader) = session.loader.as_deref() else {
        return true;
    };
    match session
        .preprocessor
        .preprocess_track(loader, data, track, |fraction| {
            debug!(track, fraction, "preprocessing");
        }) {
        Ok(timeline) => {
            if !session.timeline.install(generation, timeline) {
                debug!(track, "discarding stale timeline");
            }
        }
        Err(PreprocessError::AlreadyRunning) => {
            debug!(track, "preprocessing already running, request left pending");
            return false;
        }
        Err(e) => warn!(track, error = %e, "preprocessing failed"),
    }
    true
}

/// Background worker: keep running the pending request until it is the one
/// just completed. A request rejected as already running stays pending for
/// the worker that holds the preprocessor.
fn drain_preprocess_requests(session: &SharedSession) {
    loop {
        let Some(request) = session.pending_preprocess.lock().clone() else {
            return;
        };
        if !run_preprocess(session, &request.data, request.track, request.generation) {
            return;
        }
        let mut pending = session.pending_preprocess.lock();
        if pending
            .as_ref()
            .is_some_and(|latest| latest.generation == request.generation)
        {
            *pending = None;
            return;
        }
    }
}
