//! Tape loader (spec.md §4.D).
//!
//! Grounded on `replay/runner.py`'s `_load_events`: read non-blank lines,
//! `json.loads` each, collecting a warning (not a hard error) per
//! malformed line, then a stable sort by `seq` — stable because ties are
//! impossible by construction but a defensive sort shouldn't assume that.

use std::fs;
use std::path::Path;

use crate::error::TapeLoadError;
use crate::tape::schema::Event;

pub struct LoadedTape {
    pub events: Vec<Event>,
    pub warnings: Vec<String>,
}

pub fn load_events(path: &Path) -> Result<LoadedTape, TapeLoadError> {
    let text = fs::read_to_string(path)?;
    let mut events = Vec::new();
    let mut warnings = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => events.push(event),
            Err(e) => warnings.push(format!("malformed_event_line at line {}: {}", line_no + 1, e)),
        }
    }

    if events.is_empty() {
        return Err(TapeLoadError::Empty(path.to_path_buf()));
    }

    events.sort_by_key(|e| e.seq);

    Ok(LoadedTape { events, warnings })
}
