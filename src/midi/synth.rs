//! Built-in polyphonic tone synth
//!
//! A small oscillator synth that implements [`MidiSynth`] so sequences are
//! audible without a sampled-instrument engine. Each General MIDI program
//! family maps to a basic waveform; channel 10 plays noise and sine drums.
//! Rendering uses fixed-size voice and channel tables only.

use crate::backend::MidiSynth;
use std::f32::consts::PI;

const MAX_VOICES: usize = 32;
const MIDI_CHANNELS: usize = 16;
const ATTACK_SECS: f32 = 0.005;
const RELEASE_SECS: f32 = 0.12;
const DRUM_DECAY_SECS: f32 = 0.18;
const BEND_RANGE_SEMITONES: f32 = 2.0;
const OUTPUT_CUTOFF_HZ: f32 = 9_000.0;
const MASTER_GAIN: f32 = 0.25;

#[derive(Clone, Copy)]
struct BiquadLP {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl BiquadLP {
    fn lowpass(sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * (cutoff.min(sample_rate * 0.45) / sample_rate);
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q.max(0.1));
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos_w0) * 0.5 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) * 0.5 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    // Transposed direct form II.
    fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn clear(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Waveform {
    Square,
    Triangle,
    Saw,
    Sine,
    Noise,
}

/// General MIDI program family to a waveform.
fn waveform_for_program(program: u8) -> Waveform {
    match program {
        0..=7 => Waveform::Triangle,
        8..=15 => Waveform::Sine,
        16..=23 => Waveform::Square,
        24..=55 => Waveform::Saw,
        56..=87 => Waveform::Square,
        _ => Waveform::Triangle,
    }
}

#[derive(Clone, Copy)]
struct ChannelState {
    waveform: Waveform,
    drums: bool,
    volume: f32,
    expression: f32,
    pan: f32,
    bend: f32,
    sustain: bool,
}

impl ChannelState {
    fn new(channel: usize) -> Self {
        Self {
            waveform: Waveform::Triangle,
            drums: channel == 9,
            volume: 100.0 / 127.0,
            expression: 1.0,
            pan: 0.5,
            bend: 0.0,
            sustain: false,
        }
    }

    fn gain(&self) -> f32 {
        self.volume * self.expression
    }
}

#[derive(Clone, Copy)]
struct Voice {
    active: bool,
    channel: u8,
    key: u8,
    waveform: Waveform,
    phase: f32,
    base_freq: f32,
    phase_inc: f32,
    velocity: f32,
    env: f32,
    releasing: bool,
    sustained: bool,
    percussive: bool,
    lfsr: u16,
    age: u32,
}

impl Voice {
    const IDLE: Voice = Voice {
        active: false,
        channel: 0,
        key: 0,
        waveform: Waveform::Square,
        phase: 0.0,
        base_freq: 0.0,
        phase_inc: 0.0,
        velocity: 0.0,
        env: 0.0,
        releasing: false,
        sustained: false,
        percussive: false,
        lfsr: 1,
        age: 0,
    };

    fn oscillate(&mut self) -> f32 {
        let out = match self.waveform {
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            Waveform::Saw => 2.0 * self.phase - 1.0,
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            Waveform::Noise => {
                if self.lfsr & 1 == 1 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        self.phase += self.phase_inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
            if self.waveform == Waveform::Noise {
                let bit = (self.lfsr ^ (self.lfsr >> 1)) & 1;
                self.lfsr = (self.lfsr >> 1) | (bit << 14);
            }
        }
        out
    }
}

/// Polyphonic waveform synth for MIDI playback.
pub struct ToneSynth {
    sample_rate: f32,
    voices: [Voice; MAX_VOICES],
    channels: [ChannelState; MIDI_CHANNELS],
    filters: [BiquadLP; 2],
    attack_step: f32,
    release_step: f32,
    drum_step: f32,
    clock: u32,
}

impl ToneSynth {
    /// Synth rendering at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let filter = BiquadLP::lowpass(sr, OUTPUT_CUTOFF_HZ, 0.707);
        Self {
            sample_rate: sr,
            voices: [Voice::IDLE; MAX_VOICES],
            channels: std::array::from_fn(ChannelState::new),
            filters: [filter; 2],
            attack_step: 1.0 / (ATTACK_SECS * sr),
            release_step: 1.0 / (RELEASE_SECS * sr),
            drum_step: 1.0 / (DRUM_DECAY_SECS * sr),
            clock: 0,
        }
    }

    /// Voices currently sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn phase_inc(&self, freq: f32, channel: usize) -> f32 {
        let bend = self.channels[channel].bend;
        freq * 2f32.powf(bend / 12.0) / self.sample_rate
    }

    fn allocate(&mut self) -> usize {
        if let Some(idx) = self.voices.iter().position(|v| !v.active) {
            return idx;
        }
        // Steal the quietest voice, oldest first on ties.
        let mut best = 0;
        for (idx, voice) in self.voices.iter().enumerate() {
            let current = &self.voices[best];
            if voice.env < current.env || (voice.env == current.env && voice.age < current.age) {
                best = idx;
            }
        }
        best
    }

    fn release_voice(voice: &mut Voice, sustain: bool) {
        if voice.percussive {
            return;
        }
        if sustain {
            voice.sustained = true;
        } else {
            voice.releasing = true;
        }
    }
}

impl MidiSynth for ToneSynth {
    fn render(&mut self, buf: &mut [f32]) {
        for frame in buf.chunks_exact_mut(2) {
            let mut left = 0.0;
            let mut right = 0.0;
            for voice in self.voices.iter_mut().filter(|v| v.active) {
                if voice.percussive {
                    voice.env -= self.drum_step;
                } else if voice.releasing {
                    voice.env -= self.release_step;
                } else if voice.env < 1.0 {
                    voice.env = (voice.env + self.attack_step).min(1.0);
                }
                if voice.env <= 0.0 {
                    voice.active = false;
                    continue;
                }
                let state = &self.channels[voice.channel as usize];
                let sample = voice.oscillate() * voice.env * voice.velocity * state.gain();
                left += sample * (1.0 - state.pan);
                right += sample * state.pan;
            }
            frame[0] = self.filters[0].process(left * MASTER_GAIN);
            frame[1] = self.filters[1].process(right * MASTER_GAIN);
        }
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: f32) {
        let ch = channel as usize;
        if ch >= MIDI_CHANNELS || key > 127 {
            return;
        }
        if velocity <= 0.0 {
            self.note_off(channel, key);
            return;
        }
        let state = self.channels[ch];
        let (waveform, freq, percussive) = if state.drums {
            match key {
                // Kicks and toms: pitched sine thumps
                35 | 36 | 41 | 43 | 45 | 47 | 48 | 50 => {
                    (Waveform::Sine, 40.0 + f32::from(key.saturating_sub(35)) * 8.0, true)
                }
                _ => (Waveform::Noise, 2_000.0 + f32::from(key) * 60.0, true),
            }
        } else {
            (state.waveform, 440.0 * 2f32.powf((f32::from(key) - 69.0) / 12.0), false)
        };
        let phase_inc = if percussive {
            freq / self.sample_rate
        } else {
            self.phase_inc(freq, ch)
        };
        self.clock = self.clock.wrapping_add(1);
        let idx = self.allocate();
        self.voices[idx] = Voice {
            active: true,
            channel,
            key,
            waveform,
            phase: 0.0,
            base_freq: freq,
            phase_inc,
            velocity: velocity.clamp(0.0, 1.0),
            env: if percussive { 1.0 } else { 0.0 },
            releasing: false,
            sustained: false,
            percussive,
            lfsr: 0x4001,
            age: self.clock,
        };
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        let Some(state) = self.channels.get(channel as usize) else {
            return;
        };
        let sustain = state.sustain;
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.active && v.channel == channel && v.key == key)
        {
            Self::release_voice(voice, sustain);
        }
    }

    fn program_change(&mut self, channel: u8, program: u8, drums: bool) {
        if let Some(state) = self.channels.get_mut(channel as usize) {
            state.waveform = waveform_for_program(program);
            state.drums = drums;
        }
    }

    fn pitch_bend(&mut self, channel: u8, value: u16) {
        let ch = channel as usize;
        if ch >= MIDI_CHANNELS {
            return;
        }
        let bend = (f32::from(value.min(16383)) - 8192.0) / 8192.0 * BEND_RANGE_SEMITONES;
        self.channels[ch].bend = bend;
        let sample_rate = self.sample_rate;
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.active && !v.percussive && v.channel == channel)
        {
            voice.phase_inc = voice.base_freq * 2f32.powf(bend / 12.0) / sample_rate;
        }
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let ch = channel as usize;
        if ch >= MIDI_CHANNELS {
            return;
        }
        let normalized = f32::from(value.min(127)) / 127.0;
        match controller {
            7 => self.channels[ch].volume = normalized,
            10 => self.channels[ch].pan = normalized,
            11 => self.channels[ch].expression = normalized,
            64 => {
                let held = value >= 64;
                self.channels[ch].sustain = held;
                if !held {
                    for voice in self
                        .voices
                        .iter_mut()
                        .filter(|v| v.active && v.channel == channel && v.sustained)
                    {
                        voice.sustained = false;
                        voice.releasing = true;
                    }
                }
            }
            // All sound off
            120 => {
                for voice in self.voices.iter_mut().filter(|v| v.channel == channel) {
                    voice.active = false;
                }
            }
            // Reset all controllers
            121 => {
                let state = &mut self.channels[ch];
                state.expression = 1.0;
                state.bend = 0.0;
                state.sustain = false;
            }
            // All notes off
            123 => {
                for voice in self
                    .voices
                    .iter_mut()
                    .filter(|v| v.active && v.channel == channel)
                {
                    Self::release_voice(voice, false);
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.voices = [Voice::IDLE; MAX_VOICES];
        self.channels = std::array::from_fn(ChannelState::new);
        for filter in self.filters.iter_mut() {
            filter.clear();
        }
    }
}
