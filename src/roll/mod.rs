//! Piano-roll data: note records, segmentation, the shared timeline and the
//! live keyboard state.

pub mod keyboard;
mod note;
pub mod segmenter;
pub mod timeline;

pub use keyboard::{KeyPress, KeyboardLayout, LiveKeyboard};
pub use note::RollNote;
pub use segmenter::{MidiNoteTracker, NoteSegmenter};
pub use timeline::{SharedTimeline, Timeline, TimelineSource};
