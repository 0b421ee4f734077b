//! Backend decks
//!
//! Each playback mode keeps its backend in a deck. The dispatcher talks to
//! whichever deck is active through [`PlaybackSource`].

use crate::backend::{ChiptuneBackend, HardwareEmulator, MidiSynth, VoiceMask};
use crate::midi::{tempo_to_bpm, MidiEventKind, MidiSequence, DEFAULT_TEMPO_US, DRUM_CHANNEL};
use crate::oscillator::ApuSnapshot;
use crate::NES_CPU_CLOCK;
use std::sync::Arc;

/// What the dispatcher needs from the active backend.
pub(crate) trait PlaybackSource {
    /// Fill `out` with interleaved stereo at unity gain and `pcm` with the
    /// same frames as i16. Returns false when nothing could be produced.
    fn generate_audio(&mut self, out: &mut [f32], pcm: &mut [i16]) -> bool;

    /// Oscillator registers after the last cycle.
    fn oscillator_state(&self) -> Option<ApuSnapshot>;

    /// Elapsed playback time in seconds.
    fn position_seconds(&self) -> f64;

    /// True once the source has nothing more to play.
    fn has_ended(&self) -> bool;

    /// Gain applied to this source given the master gain.
    fn output_gain(&self, master: f32) -> f32 {
        master
    }
}

fn pcm_to_float(pcm: &[i16], out: &mut [f32]) {
    for (dst, &src) in out.iter_mut().zip(pcm.iter()) {
        *dst = f32::from(src) / 32768.0;
    }
}

// ============================================================================
// Chiptune
// ============================================================================

pub(crate) struct ChiptuneDeck {
    pub backend: Box<dyn ChiptuneBackend>,
    pub data: Arc<[u8]>,
    pub track: usize,
    pub track_count: usize,
}

impl ChiptuneDeck {
    pub fn new(backend: Box<dyn ChiptuneBackend>, data: Arc<[u8]>) -> Self {
        let track_count = backend.track_count();
        Self {
            backend,
            data,
            track: 0,
            track_count,
        }
    }

    pub fn start(&mut self, track: usize, tempo: f64, mute: VoiceMask) -> crate::Result<()> {
        self.backend.start_track(track)?;
        self.backend.set_tempo(tempo);
        self.backend.mute_voices(mute);
        self.track = track;
        Ok(())
    }
}

impl PlaybackSource for ChiptuneDeck {
    fn generate_audio(&mut self, out: &mut [f32], pcm: &mut [i16]) -> bool {
        if self.backend.play(pcm).is_err() {
            return false;
        }
        pcm_to_float(pcm, out);
        true
    }

    fn oscillator_state(&self) -> Option<ApuSnapshot> {
        self.backend.oscillators()
    }

    fn position_seconds(&self) -> f64 {
        self.backend.tell() as f64 / 1000.0
    }

    fn has_ended(&self) -> bool {
        self.backend.track_ended()
    }
}

// ============================================================================
// Hardware
// ============================================================================

pub(crate) struct HardwareDeck {
    pub emulator: Box<dyn HardwareEmulator>,
    pub loaded: bool,
    pub expansion: bool,
}

impl HardwareDeck {
    pub fn new(emulator: Box<dyn HardwareEmulator>) -> Self {
        Self {
            emulator,
            loaded: false,
            expansion: false,
        }
    }
}

impl PlaybackSource for HardwareDeck {
    fn generate_audio(&mut self, out: &mut [f32], pcm: &mut [i16]) -> bool {
        let frames = pcm.len() / 2;
        let got = self.emulator.read_audio(&mut pcm[..frames]).min(frames);
        pcm[got..frames].fill(0);
        // Widen mono to stereo in place, back to front.
        for i in (0..frames).rev() {
            let s = pcm[i];
            pcm[2 * i] = s;
            pcm[2 * i + 1] = s;
        }
        pcm_to_float(pcm, out);
        true
    }

    fn oscillator_state(&self) -> Option<ApuSnapshot> {
        Some(self.emulator.oscillators())
    }

    fn position_seconds(&self) -> f64 {
        self.emulator.cycle_count() as f64 / NES_CPU_CLOCK
    }

    fn has_ended(&self) -> bool {
        false
    }
}

// ============================================================================
// MIDI
// ============================================================================

pub(crate) struct MidiDeck {
    pub synth: Box<dyn MidiSynth>,
    pub sequence: MidiSequence,
    pub cursor: usize,
    pub time_secs: f64,
    pub bpm: f64,
    pub volume: f32,
    sample_rate: f64,
}

impl MidiDeck {
    pub fn new(synth: Box<dyn MidiSynth>, sample_rate: u32) -> Self {
        Self {
            synth,
            sequence: MidiSequence::default(),
            cursor: 0,
            time_secs: 0.0,
            bpm: tempo_to_bpm(DEFAULT_TEMPO_US),
            volume: 1.0,
            sample_rate: f64::from(sample_rate.max(1)),
        }
    }

    pub fn load(&mut self, sequence: MidiSequence) {
        self.sequence = sequence;
        self.rewind();
    }

    /// Back to the first event with every voice silenced.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.time_secs = 0.0;
        self.bpm = self.sequence.initial_bpm();
        self.synth.reset();
    }

    fn dispatch(&mut self, kind: MidiEventKind) {
        match kind {
            MidiEventKind::ProgramChange { channel, program } => {
                self.synth
                    .program_change(channel, program, channel == DRUM_CHANNEL);
            }
            MidiEventKind::NoteOn {
                channel,
                key,
                velocity: 0,
            } => self.synth.note_off(channel, key),
            MidiEventKind::NoteOn {
                channel,
                key,
                velocity,
            } => self
                .synth
                .note_on(channel, key, f32::from(velocity) / 127.0),
            MidiEventKind::NoteOff { channel, key } => self.synth.note_off(channel, key),
            MidiEventKind::PitchBend { channel, value } => self.synth.pitch_bend(channel, value),
            MidiEventKind::ControlChange {
                channel,
                controller,
                value,
            } => self.synth.control_change(channel, controller, value),
            MidiEventKind::Tempo(us) => self.bpm = tempo_to_bpm(us),
        }
    }
}

impl PlaybackSource for MidiDeck {
    fn generate_audio(&mut self, out: &mut [f32], pcm: &mut [i16]) -> bool {
        self.synth.render(out);

        let frames = out.len() / 2;
        let block_end = self.time_secs + frames as f64 / self.sample_rate;
        while let Some(event) = self.sequence.events().get(self.cursor).copied() {
            if event.time_secs() >= block_end {
                break;
            }
            self.dispatch(event.kind);
            self.cursor += 1;
        }
        self.time_secs = block_end;

        for (dst, &src) in pcm.iter_mut().zip(out.iter()) {
            *dst = (src.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        }
        true
    }

    fn oscillator_state(&self) -> Option<ApuSnapshot> {
        None
    }

    fn position_seconds(&self) -> f64 {
        self.time_secs
    }

    fn has_ended(&self) -> bool {
        self.cursor >= self.sequence.len()
    }

    fn output_gain(&self, _master: f32) -> f32 {
        self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEvent;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    struct LoggingSynth(std::sync::Arc<parking_lot::Mutex<Log>>);

    impl MidiSynth for LoggingSynth {
        fn render(&mut self, buf: &mut [f32]) {
            buf.fill(0.5);
        }
        fn note_on(&mut self, channel: u8, key: u8, velocity: f32) {
            self.0.lock().calls.push(format!("on {channel} {key} {velocity:.2}"));
        }
        fn note_off(&mut self, channel: u8, key: u8) {
            self.0.lock().calls.push(format!("off {channel} {key}"));
        }
        fn program_change(&mut self, channel: u8, program: u8, drums: bool) {
            self.0
                .lock()
                .calls
                .push(format!("prog {channel} {program} {drums}"));
        }
        fn pitch_bend(&mut self, channel: u8, value: u16) {
            self.0.lock().calls.push(format!("bend {channel} {value}"));
        }
        fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
            self.0
                .lock()
                .calls
                .push(format!("cc {channel} {controller} {value}"));
        }
        fn reset(&mut self) {
            self.0.lock().calls.push("reset".into());
        }
    }

    fn deck(events: Vec<MidiEvent>) -> (MidiDeck, std::sync::Arc<parking_lot::Mutex<Log>>) {
        let log = std::sync::Arc::new(parking_lot::Mutex::new(Log::default()));
        let mut deck = MidiDeck::new(Box::new(LoggingSynth(log.clone())), 1000);
        deck.load(MidiSequence::from_events(events));
        log.lock().calls.clear();
        (deck, log)
    }

    #[test]
    fn test_midi_deck_dispatches_events_in_block() {
        let (mut deck, log) = deck(vec![
            MidiEvent::new(0.0, MidiEventKind::ProgramChange { channel: 9, program: 0 }),
            MidiEvent::new(5.0, MidiEventKind::NoteOn { channel: 0, key: 60, velocity: 127 }),
            MidiEvent::new(9.0, MidiEventKind::NoteOn { channel: 0, key: 60, velocity: 0 }),
            MidiEvent::new(10.0, MidiEventKind::Tempo(250_000)),
        ]);
        let mut out = [0.0f32; 20];
        let mut pcm = [0i16; 20];

        // 10 frames at 1 kHz cover [0, 10) ms.
        assert!(deck.generate_audio(&mut out, &mut pcm));
        assert_eq!(
            log.lock().calls,
            vec!["prog 9 0 true", "on 0 60 1.00", "off 0 60"]
        );
        assert_eq!(deck.cursor, 3);
        assert!(!deck.has_ended());
        assert_eq!(pcm[0], (0.5 * f32::from(i16::MAX)) as i16);

        deck.generate_audio(&mut out, &mut pcm);
        assert!(deck.has_ended());
        assert!((deck.bpm - 240.0).abs() < 1e-9);
        assert!((deck.position_seconds() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_midi_rewind_resets_synth() {
        let (mut deck, log) = deck(vec![MidiEvent::new(
            0.0,
            MidiEventKind::PitchBend { channel: 2, value: 9000 },
        )]);
        let mut out = [0.0f32; 4];
        let mut pcm = [0i16; 4];
        deck.generate_audio(&mut out, &mut pcm);
        deck.rewind();
        assert_eq!(deck.cursor, 0);
        assert_eq!(deck.time_secs, 0.0);
        assert_eq!(log.lock().calls, vec!["bend 2 9000", "reset"]);
    }

    struct ShortRead;

    impl HardwareEmulator for ShortRead {
        fn load(&mut self, _rom: &[u8]) -> crate::Result<()> {
            Ok(())
        }
        fn reset(&mut self) {}
        fn run_frame(&mut self) {}
        fn read_audio(&mut self, buf: &mut [i16]) -> usize {
            let n = buf.len().min(3);
            for (i, s) in buf.iter_mut().take(n).enumerate() {
                *s = (i as i16 + 1) * 1000;
            }
            n
        }
        fn oscillators(&self) -> ApuSnapshot {
            ApuSnapshot::silent()
        }
        fn cycle_count(&self) -> u64 {
            NES_CPU_CLOCK as u64 * 2
        }
        fn set_input(&mut self, _player: usize, _buttons: crate::backend::Buttons) {}
        fn save_state(&self) -> crate::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn load_state(&mut self, _state: &[u8]) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_hardware_deck_widens_and_pads() {
        let mut deck = HardwareDeck::new(Box::new(ShortRead));
        let mut out = [1.0f32; 10];
        let mut pcm = [7i16; 10];
        deck.generate_audio(&mut out, &mut pcm);
        assert_eq!(pcm, [1000, 1000, 2000, 2000, 3000, 3000, 0, 0, 0, 0]);
        assert_eq!(out[8], 0.0);
        assert!((deck.position_seconds() - 2.0).abs() < 1e-9);
    }
}
