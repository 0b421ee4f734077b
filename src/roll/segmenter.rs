//! Note segmentation
//!
//! [`NoteSegmenter`] turns a time-ordered stream of per-channel readings into
//! closed notes: a note ends when the pitch changes or the channel falls
//! silent. [`MidiNoteTracker`] does the same for explicit note-on and note-off
//! events.

use super::{RollNote, Timeline};
use crate::pitch::{NoteReading, SnapshotReadings};

/// Shortest note kept from register polling, in seconds.
pub const SYNTH_MIN_NOTE_SECS: f64 = 0.010;
/// Shortest note kept from MIDI events, in seconds.
pub const MIDI_MIN_NOTE_SECS: f64 = 0.005;
/// Readings at or below this velocity count as silence.
pub const VELOCITY_FLOOR: f32 = 0.01;
/// Extra time given to MIDI notes left open when the event stream ends.
pub const MIDI_RELEASE_TAIL_SECS: f64 = 0.5;
/// Channels tracked by either segmenter.
pub const MAX_SEGMENT_CHANNELS: usize = 16;

const MIDI_KEYS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenNote {
    pitch: u8,
    velocity: f32,
    start: f64,
}

impl OpenNote {
    fn close(self, channel: u8, end: f64) -> RollNote {
        RollNote {
            channel,
            pitch: self.pitch,
            velocity: self.velocity,
            start_time: self.start,
            end_time: end,
        }
    }
}

/// Segmenter for continuously polled channels.
#[derive(Debug, Clone)]
pub struct NoteSegmenter {
    open: [Option<OpenNote>; MAX_SEGMENT_CHANNELS],
    notes: Vec<RollNote>,
    min_duration: f64,
}

impl Default for NoteSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteSegmenter {
    /// Segmenter with the 10 ms synthesized-channel threshold.
    pub fn new() -> Self {
        Self::with_min_duration(SYNTH_MIN_NOTE_SECS)
    }

    /// Segmenter with a custom minimum note length.
    pub fn with_min_duration(min_duration: f64) -> Self {
        Self {
            open: [None; MAX_SEGMENT_CHANNELS],
            notes: Vec::new(),
            min_duration,
        }
    }

    /// Feed one channel's reading at time `now`.
    ///
    /// Channels outside `0..16` are ignored.
    pub fn observe(&mut self, channel: u8, reading: NoteReading, now: f64) {
        let Some(slot) = self.open.get_mut(channel as usize) else {
            return;
        };
        let previous = slot.map(|n| n.pitch);
        if reading.pitch == previous && reading.velocity >= VELOCITY_FLOOR {
            return;
        }

        if let Some(open) = slot.take() {
            if now - open.start > self.min_duration {
                self.notes.push(open.close(channel, now));
            }
        }

        if let Some(pitch) = reading.pitch {
            if pitch <= 127 && reading.velocity > VELOCITY_FLOOR {
                *slot = Some(OpenNote {
                    pitch,
                    velocity: reading.velocity,
                    start: now,
                });
            }
        }
    }

    /// Feed every channel of a snapshot's readings at time `now`.
    pub fn observe_all(&mut self, readings: &SnapshotReadings, now: f64) {
        for (channel, reading) in readings.iter() {
            self.observe(channel.tag(), reading, now);
        }
    }

    /// Notes closed so far.
    pub fn closed_count(&self) -> usize {
        self.notes.len()
    }

    /// Close everything still sounding at `end_time` and build a ready timeline.
    pub fn finish(mut self, end_time: f64) -> Timeline {
        for (channel, slot) in self.open.iter_mut().enumerate() {
            if let Some(open) = slot.take() {
                if end_time - open.start > self.min_duration {
                    self.notes.push(open.close(channel as u8, end_time));
                }
            }
        }
        Timeline::from_notes(self.notes, end_time)
    }
}

/// Segmenter for explicit MIDI note events.
#[derive(Debug, Clone)]
pub struct MidiNoteTracker {
    open: Vec<Option<OpenNote>>,
    notes: Vec<RollNote>,
    last_time: f64,
}

impl Default for MidiNoteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiNoteTracker {
    /// Empty tracker for 16 channels.
    pub fn new() -> Self {
        Self {
            open: vec![None; MAX_SEGMENT_CHANNELS * MIDI_KEYS],
            notes: Vec::new(),
            last_time: 0.0,
        }
    }

    fn slot(channel: u8, key: u8) -> Option<usize> {
        let (channel, key) = (channel as usize, key as usize);
        (channel < MAX_SEGMENT_CHANNELS && key < MIDI_KEYS).then_some(channel * MIDI_KEYS + key)
    }

    fn advance(&mut self, time: f64) {
        if time > self.last_time {
            self.last_time = time;
        }
    }

    /// Note-on; velocity 0 is treated as note-off.
    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8, time: f64) {
        self.advance(time);
        if velocity == 0 {
            self.close(channel, key, time);
            return;
        }
        let Some(idx) = Self::slot(channel, key) else {
            return;
        };
        // Retrigger closes the sounding instance first.
        if self.open[idx].is_some() {
            self.close(channel, key, time);
        }
        self.open[idx] = Some(OpenNote {
            pitch: key,
            velocity: f32::from(velocity) / 127.0,
            start: time,
        });
    }

    /// Note-off.
    pub fn note_off(&mut self, channel: u8, key: u8, time: f64) {
        self.advance(time);
        self.close(channel, key, time);
    }

    /// Record an event that carries no note, so the stream end is tracked.
    pub fn touch(&mut self, time: f64) {
        self.advance(time);
    }

    fn close(&mut self, channel: u8, key: u8, time: f64) {
        let Some(idx) = Self::slot(channel, key) else {
            return;
        };
        if let Some(open) = self.open[idx].take() {
            if time - open.start > MIDI_MIN_NOTE_SECS {
                self.notes.push(open.close(channel, time));
            }
        }
    }

    /// Close held notes half a second past the last event and build a ready timeline.
    pub fn finish(mut self) -> Timeline {
        let end = self.last_time + MIDI_RELEASE_TAIL_SECS;
        for (idx, slot) in self.open.iter_mut().enumerate() {
            if let Some(open) = slot.take() {
                self.notes.push(open.close((idx / MIDI_KEYS) as u8, end));
            }
        }
        Timeline::from_notes(self.notes, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::{ApuChannel, ApuSnapshot, OscillatorState};
    use crate::pitch::PitchInference;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    /// Within each group, consecutive notes must not overlap.
    fn assert_groups_disjoint<K: Ord>(notes: &[RollNote], group: impl Fn(&RollNote) -> K) {
        let mut groups: BTreeMap<K, Vec<&RollNote>> = BTreeMap::new();
        for note in notes {
            groups.entry(group(note)).or_default().push(note);
        }
        for run in groups.values() {
            for pair in run.windows(2) {
                assert!(
                    pair[0].end_time <= pair[1].start_time,
                    "{:?} overlaps {:?}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    fn on(pitch: u8, velocity: f32) -> NoteReading {
        NoteReading {
            pitch: Some(pitch),
            velocity,
        }
    }

    #[test]
    fn test_pitch_change_closes_previous() {
        let mut seg = NoteSegmenter::new();
        seg.observe(0, on(60, 0.5), 0.0);
        seg.observe(0, on(60, 0.7), 0.1);
        seg.observe(0, on(62, 0.5), 0.2);
        seg.observe(0, NoteReading::SILENT, 0.5);
        let timeline = seg.finish(1.0);
        let notes = timeline.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].pitch, 60);
        assert_relative_eq!(notes[0].end_time, 0.2);
        // Velocity stays at the value the note opened with.
        assert_relative_eq!(notes[0].velocity, 0.5);
        assert_eq!(notes[1].pitch, 62);
        assert_relative_eq!(notes[1].start_time, 0.2);
        assert_relative_eq!(notes[1].end_time, 0.5);
    }

    #[test]
    fn test_short_notes_dropped() {
        let mut seg = NoteSegmenter::new();
        seg.observe(1, on(60, 1.0), 0.0);
        seg.observe(1, on(61, 1.0), 0.005);
        seg.observe(1, NoteReading::SILENT, 0.5);
        let timeline = seg.finish(0.5);
        assert_eq!(timeline.notes().len(), 1);
        assert_eq!(timeline.notes()[0].pitch, 61);
    }

    #[test]
    fn test_low_velocity_same_pitch_retriggers() {
        let mut seg = NoteSegmenter::new();
        seg.observe(0, on(60, 0.5), 0.0);
        seg.observe(0, on(60, 0.005), 0.3);
        seg.observe(0, on(60, 0.5), 0.6);
        let timeline = seg.finish(0.9);
        let starts: Vec<f64> = timeline.notes().iter().map(|n| n.start_time).collect();
        assert_eq!(starts, vec![0.0, 0.6]);
    }

    #[test]
    fn test_finish_sorts_across_channels() {
        let mut seg = NoteSegmenter::new();
        seg.observe(3, on(40, 0.5), 0.4);
        seg.observe(0, on(60, 0.5), 0.1);
        seg.observe(0, NoteReading::SILENT, 0.2);
        seg.observe(2, on(50, 0.5), 0.0);
        let timeline = seg.finish(1.0);
        assert!(timeline.is_ready());
        assert_relative_eq!(timeline.duration(), 1.0);
        let channels: Vec<u8> = timeline.notes().iter().map(|n| n.channel).collect();
        assert_eq!(channels, vec![2, 0, 3]);
    }

    #[test]
    fn test_out_of_range_channel_ignored() {
        let mut seg = NoteSegmenter::new();
        seg.observe(16, on(60, 1.0), 0.0);
        assert!(seg.finish(1.0).notes().is_empty());
    }

    #[test]
    fn test_midi_zero_velocity_is_note_off() {
        let mut tracker = MidiNoteTracker::new();
        tracker.note_on(0, 60, 100, 0.0);
        tracker.note_on(0, 60, 0, 0.5);
        let timeline = tracker.finish();
        assert_eq!(timeline.notes().len(), 1);
        let note = timeline.notes()[0];
        assert_eq!((note.channel, note.pitch), (0, 60));
        assert_relative_eq!(note.start_time, 0.0);
        assert_relative_eq!(note.end_time, 0.5);
        assert_relative_eq!(note.velocity, 100.0 / 127.0);
        assert_relative_eq!(timeline.duration(), 1.0);
    }

    #[test]
    fn test_midi_held_notes_get_tail() {
        let mut tracker = MidiNoteTracker::new();
        tracker.note_on(9, 36, 127, 1.0);
        tracker.touch(2.0);
        let timeline = tracker.finish();
        let note = timeline.notes()[0];
        assert_eq!(note.channel, 9);
        assert_relative_eq!(note.end_time, 2.5);
    }

    #[test]
    fn test_midi_retrigger_closes_first() {
        let mut tracker = MidiNoteTracker::new();
        tracker.note_on(1, 64, 64, 0.0);
        tracker.note_on(1, 64, 64, 0.25);
        tracker.note_off(1, 64, 0.75);
        let timeline = tracker.finish();
        assert_eq!(timeline.notes().len(), 2);
        assert_relative_eq!(timeline.notes()[0].end_time, 0.25);
        assert_relative_eq!(timeline.notes()[1].start_time, 0.25);
    }

    #[test]
    fn test_midi_unmatched_off_ignored() {
        let mut tracker = MidiNoteTracker::new();
        tracker.note_off(0, 60, 1.0);
        tracker.note_on(17, 60, 100, 1.0);
        assert!(tracker.finish().notes().is_empty());
    }

    #[test]
    fn test_channel_notes_never_overlap() {
        const PERIODS: [i32; 4] = [253, 239, 225, 213];
        let inference = PitchInference::default();
        let step = 1024.0 / 44_100.0;
        let mut seg = NoteSegmenter::new();
        for i in 0..400usize {
            // Gaps of silence plus same-pitch level dips on square 1.
            let square1_level = match (i % 17, i % 9) {
                (0..=2, _) => 0,
                (_, 4) => 2,
                _ => 12,
            };
            let square2_length = if i % 31 < 2 { 0 } else { 10 };
            let triangle_length = if i % 23 < 4 { 0 } else { 30 };
            let noise_level = if i % 13 < 5 { 0 } else { 6 };
            let snapshot = ApuSnapshot::silent()
                .with_base(
                    ApuChannel::Square1,
                    OscillatorState::new(PERIODS[(i / 5) % 4], 10, square1_level),
                )
                .with_base(
                    ApuChannel::Square2,
                    OscillatorState::new(PERIODS[(i / 7) % 4] * 2 + 1, square2_length, 8),
                )
                .with_base(
                    ApuChannel::Triangle,
                    OscillatorState::new(PERIODS[(i / 11) % 4], triangle_length, 0),
                )
                .with_base(
                    ApuChannel::Noise,
                    OscillatorState::new((i / 3 % 16) as i32, 5, noise_level),
                );
            seg.observe_all(&inference.infer_snapshot(&snapshot), i as f64 * step);
        }
        let timeline = seg.finish(400.0 * step);
        let notes = timeline.notes();

        assert!(notes.len() > 40);
        let mut channels: Vec<u8> = notes.iter().map(|n| n.channel).collect();
        channels.sort_unstable();
        channels.dedup();
        assert_eq!(channels, vec![0, 1, 2, 3]);
        assert!(notes.iter().all(|n| n.end_time > n.start_time));
        assert_groups_disjoint(notes, |n| n.channel);
    }

    #[test]
    fn test_midi_retriggers_never_overlap() {
        let mut tracker = MidiNoteTracker::new();
        for i in 0..40u8 {
            let t = f64::from(i) * 0.1;
            // Key 60 is retriggered without note-offs; 64 and 67 form chords.
            tracker.note_on(0, 60, 90, t);
            if i % 3 == 0 {
                tracker.note_on(0, 64, 80, t + 0.02);
            }
            if i % 4 == 1 {
                tracker.note_off(0, 64, t + 0.05);
                tracker.note_on(1, 67, 70, t);
            }
            if i % 5 == 2 {
                tracker.note_on(1, 67, 0, t + 0.01);
            }
        }
        let timeline = tracker.finish();
        let notes = timeline.notes();

        assert_eq!(notes.iter().filter(|n| n.pitch == 60).count(), 40);
        assert!(notes.iter().all(|n| n.end_time > n.start_time));
        assert_groups_disjoint(notes, |n| (n.channel, n.pitch));
    }
}
