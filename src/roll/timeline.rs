//! Preprocessed note timeline and its shared handle.

use super::RollNote;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What a timeline was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TimelineSource {
    /// Nothing loaded yet
    #[default]
    None,
    /// A chiptune track index
    Track(usize),
    /// A MIDI sequence
    Midi,
}

/// Sorted notes of a whole track.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    notes: Vec<RollNote>,
    duration: f64,
    ready: bool,
    source: TimelineSource,
}

impl Timeline {
    /// Empty, not-ready timeline.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Ready timeline from unsorted notes.
    pub fn from_notes(mut notes: Vec<RollNote>, duration: f64) -> Self {
        notes.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        Self {
            notes,
            duration,
            ready: true,
            source: TimelineSource::None,
        }
    }

    /// Tag the timeline with its source.
    pub fn with_source(mut self, source: TimelineSource) -> Self {
        self.source = source;
        self
    }

    /// All notes, ascending by start time.
    pub fn notes(&self) -> &[RollNote] {
        &self.notes
    }

    /// Track length covered, in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// True once preprocessing finished.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Where the notes came from.
    pub fn source(&self) -> TimelineSource {
        self.source
    }

    /// Number of notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// True when there are no notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes sounding at `time`.
    pub fn active_at(&self, time: f64) -> impl Iterator<Item = &RollNote> + '_ {
        self.notes
            .iter()
            .take_while(move |n| n.start_time <= time)
            .filter(move |n| n.end_time > time)
    }

    /// Notes visible in a piano-roll window starting at `time` and spanning
    /// `ahead` seconds, limited to keys `low..=high`.
    pub fn window(
        &self,
        time: f64,
        ahead: f64,
        low: u8,
        high: u8,
    ) -> impl Iterator<Item = &RollNote> + '_ {
        let horizon = time + ahead;
        self.notes
            .iter()
            .take_while(move |n| n.start_time <= horizon)
            .filter(move |n| n.end_time > time && (low..=high).contains(&n.pitch))
    }
}

/// Timeline shared between the control thread, preprocessing workers and
/// readers such as the piano-roll view.
///
/// Each load bumps a generation counter; a preprocessing result is only
/// installed if no newer load happened while it ran.
#[derive(Debug, Clone, Default)]
pub struct SharedTimeline {
    inner: Arc<RwLock<Timeline>>,
    generation: Arc<AtomicU64>,
}

impl SharedTimeline {
    /// Empty shared timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Timeline> {
        self.inner.read()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// True when a ready timeline is installed.
    pub fn is_ready(&self) -> bool {
        self.inner.read().is_ready()
    }

    /// Drop the current timeline and start a new generation.
    pub fn begin_generation(&self) -> u64 {
        let mut guard = self.inner.write();
        *guard = Timeline::empty();
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Replace the timeline if `generation` is still current.
    pub fn install(&self, generation: u64, timeline: Timeline) -> bool {
        let mut guard = self.inner.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        *guard = timeline;
        true
    }

    /// Drop the timeline without starting a new generation.
    pub fn clear(&self) {
        *self.inner.write() = Timeline::empty();
    }
}
