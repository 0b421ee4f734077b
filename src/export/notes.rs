//! Note-list export

use crate::roll::{RollNote, Timeline};
use crate::{ChiprollError, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct NoteList<'a> {
    duration: f64,
    note_count: usize,
    notes: &'a [RollNote],
}

/// Write one CSV row per note with a header line.
pub fn write_notes_csv<P: AsRef<Path>>(timeline: &Timeline, path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())
        .map_err(|e| ChiprollError::ExportError(format!("failed to create CSV file: {}", e)))?;
    for note in timeline.notes() {
        writer
            .serialize(note)
            .map_err(|e| ChiprollError::ExportError(format!("failed to write note: {}", e)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the timeline as a JSON object with its duration and notes.
pub fn write_notes_json<P: AsRef<Path>>(timeline: &Timeline, path: P) -> Result<()> {
    let list = NoteList {
        duration: timeline.duration(),
        note_count: timeline.len(),
        notes: timeline.notes(),
    };
    let json = serde_json::to_string_pretty(&list)
        .map_err(|e| ChiprollError::ExportError(format!("failed to encode notes: {}", e)))?;
    std::fs::write(path.as_ref(), json)?;
    Ok(())
}
