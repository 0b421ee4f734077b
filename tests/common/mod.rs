//! Scripted backends shared by the integration tests.

#![allow(dead_code)]

use chiproll::backend::{Buttons, ChiptuneBackend, ChiptuneLoader, HardwareEmulator, TrackInfo, VoiceMask};
use chiproll::oscillator::{ApuChannel, ApuSnapshot, ExpansionOscillatorState, OscillatorState};
use chiproll::{ChiprollError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

/// Square 1 period for A4 at the NTSC clock.
pub const A4_PERIOD: i32 = 253;

/// Level written while the scripted tone sounds: 0.5 full scale.
pub const TONE_LEVEL: i16 = 16_384;

/// What one scripted track does.
#[derive(Debug, Clone, Copy)]
pub struct TrackScript {
    /// Length reported by `track_info`.
    pub length_ms: Option<u64>,
    /// Square 1 plays A4 until this position.
    pub tone_until_ms: u64,
    /// The decoder reports the track ended from this position on.
    pub ends_at_ms: Option<u64>,
}

impl TrackScript {
    /// A4 for `tone_ms`, then silence, with the given reported length.
    pub fn tone(tone_ms: u64, length_ms: u64) -> Self {
        Self {
            length_ms: Some(length_ms),
            tone_until_ms: tone_ms,
            ends_at_ms: None,
        }
    }

    /// Mark the track as ending at `ms`.
    pub fn ending_at(mut self, ms: u64) -> Self {
        self.ends_at_ms = Some(ms);
        self
    }
}

/// Chiptune decoder following a list of track scripts.
pub struct ScriptedBackend {
    tracks: Vec<TrackScript>,
    sample_rate: u32,
    track: usize,
    frames: u64,
    seeks: Arc<Mutex<Vec<i64>>>,
    fail_play: bool,
}

impl ScriptedBackend {
    fn position_ms(&self) -> u64 {
        self.frames * 1000 / u64::from(self.sample_rate)
    }

    fn script(&self) -> TrackScript {
        self.tracks[self.track]
    }

    fn sounding(&self) -> bool {
        self.position_ms() < self.script().tone_until_ms
    }
}

impl ChiptuneBackend for ScriptedBackend {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn start_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(ChiprollError::BackendError(format!("no track {}", index)));
        }
        self.track = index;
        self.frames = 0;
        Ok(())
    }

    fn play(&mut self, buf: &mut [i16]) -> Result<()> {
        if self.fail_play {
            return Err(ChiprollError::BackendError("decoder fault".into()));
        }
        let level = if self.sounding() { TONE_LEVEL } else { 0 };
        buf.fill(level);
        self.frames += buf.len() as u64 / 2;
        Ok(())
    }

    fn seek(&mut self, position_ms: i64) -> Result<()> {
        self.seeks.lock().push(position_ms);
        self.frames = position_ms.max(0) as u64 * u64::from(self.sample_rate) / 1000;
        Ok(())
    }

    fn tell(&self) -> i64 {
        self.position_ms() as i64
    }

    fn track_ended(&self) -> bool {
        self.script()
            .ends_at_ms
            .is_some_and(|end| self.position_ms() >= end)
    }

    fn set_tempo(&mut self, _tempo: f64) {}

    fn mute_voices(&mut self, _mask: VoiceMask) {}

    fn track_info(&self, index: usize) -> Result<TrackInfo> {
        let script = self
            .tracks
            .get(index)
            .ok_or_else(|| ChiprollError::BackendError(format!("no track {}", index)))?;
        Ok(TrackInfo {
            title: format!("Track {}", index + 1),
            length_ms: script.length_ms,
            ..TrackInfo::default()
        })
    }

    fn oscillators(&self) -> Option<ApuSnapshot> {
        let square = if self.sounding() {
            OscillatorState::new(A4_PERIOD, 10, 12)
        } else {
            OscillatorState::default()
        };
        Some(ApuSnapshot::silent().with_base(ApuChannel::Square1, square))
    }
}

/// Opens [`ScriptedBackend`]s and counts how often it was asked to.
pub struct ScriptedLoader {
    pub tracks: Vec<TrackScript>,
    pub opens: AtomicUsize,
    pub seeks: Arc<Mutex<Vec<i64>>>,
    pub fail_open: bool,
    pub fail_play: bool,
    /// When set, the open numbered `gated_open` meets the test thread at the
    /// first barrier and waits at the second before returning.
    pub gate: Option<(Arc<Barrier>, Arc<Barrier>)>,
    /// Zero-based index of the open that waits on `gate`.
    pub gated_open: usize,
}

impl ScriptedLoader {
    pub fn new(tracks: Vec<TrackScript>) -> Self {
        Self {
            tracks,
            opens: AtomicUsize::new(0),
            seeks: Arc::new(Mutex::new(Vec::new())),
            fail_open: false,
            fail_play: false,
            gate: None,
            gated_open: 0,
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ChiptuneLoader for ScriptedLoader {
    fn open(&self, _data: &[u8], sample_rate: u32) -> Result<Box<dyn ChiptuneBackend>> {
        let index = self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            if index == self.gated_open {
                entered.wait();
                release.wait();
            }
        }
        if self.fail_open {
            return Err(ChiprollError::LoadError("not a chiptune".into()));
        }
        Ok(Box::new(ScriptedBackend {
            tracks: self.tracks.clone(),
            sample_rate,
            track: 0,
            frames: 0,
            seeks: Arc::clone(&self.seeks),
            fail_play: self.fail_play,
        }))
    }
}

/// Emulator that produces a fixed number of mono frames per read.
pub struct FakeEmulator {
    pub frames_per_read: usize,
    pub level: i16,
    pub cycles: u64,
    pub frames_run: Arc<AtomicUsize>,
    pub inputs: Arc<Mutex<Vec<(usize, Buttons)>>>,
    pub state: Vec<u8>,
}

impl FakeEmulator {
    pub fn new(frames_per_read: usize, level: i16) -> Self {
        Self {
            frames_per_read,
            level,
            cycles: 0,
            frames_run: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
            state: Vec::new(),
        }
    }
}

/// Cycles in one NTSC video frame.
pub const CYCLES_PER_FRAME: u64 = 29_781;

impl HardwareEmulator for FakeEmulator {
    fn load(&mut self, rom: &[u8]) -> Result<()> {
        if rom.len() < 16 || &rom[..4] != b"NES\x1A" {
            return Err(ChiprollError::LoadError("bad ROM".into()));
        }
        self.cycles = 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.cycles = 0;
    }

    fn run_frame(&mut self) {
        self.cycles += CYCLES_PER_FRAME;
        self.frames_run.fetch_add(1, Ordering::SeqCst);
    }

    fn read_audio(&mut self, buf: &mut [i16]) -> usize {
        let n = buf.len().min(self.frames_per_read);
        buf[..n].fill(self.level);
        n
    }

    fn oscillators(&self) -> ApuSnapshot {
        ApuSnapshot::silent()
            .with_base(ApuChannel::Square1, OscillatorState::new(A4_PERIOD, 10, 15))
            .with_expansion(
                ApuChannel::Vrc6Saw,
                ExpansionOscillatorState::new(A4_PERIOD, 21, true),
            )
    }

    fn cycle_count(&self) -> u64 {
        self.cycles
    }

    fn set_input(&mut self, player: usize, buttons: Buttons) {
        self.inputs.lock().push((player, buttons));
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(self.cycles.to_le_bytes().to_vec())
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        let bytes: [u8; 8] = state
            .try_into()
            .map_err(|_| ChiprollError::BackendError("bad state".into()))?;
        self.cycles = u64::from_le_bytes(bytes);
        Ok(())
    }
}

/// 16-byte iNES header plus a little PRG.
pub fn rom(mapper: u8) -> Vec<u8> {
    let mut data = vec![b'N', b'E', b'S', 0x1A, 1, 1, (mapper & 0x0F) << 4, mapper & 0xF0];
    data.extend_from_slice(&[0; 8]);
    data.extend_from_slice(&[0xEA; 64]);
    data
}
