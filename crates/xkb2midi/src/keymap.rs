//! Keycode to MIDI note mapping
//!
//! The mapping file is line oriented:
//!
//! ```text
//! ; comments start with a semicolon
//! 38 = 60   ; keycode 38 plays middle C
//! 39=62
//! ```
//!
//! Keycodes are X11 keycodes as reported by `xev` or `xkbcomp`. Notes are
//! masked to 7 bits, so `200` becomes `72`. Lines that cannot be parsed are
//! reported and skipped; the rest of the file still loads.

use std::collections::BTreeMap;

/// Mask applied to every configured note number
pub const NOTE_MASK: u8 = 0x7F;

/// Mapping from device keycode to MIDI note
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCodeMap {
    notes: BTreeMap<u8, u8>,
}

impl KeyCodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `keycode` to `note & 0x7F`, returning the previous note if any
    pub fn insert(&mut self, keycode: u8, note: u8) -> Option<u8> {
        self.notes.insert(keycode, note & NOTE_MASK)
    }

    /// Note for a keycode, if mapped
    pub fn note_for(&self, keycode: u8) -> Option<u8> {
        self.notes.get(&keycode).copied()
    }

    /// Mapped keycodes in ascending order
    pub fn keycodes(&self) -> impl Iterator<Item = u8> + '_ {
        self.notes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.notes.iter().map(|(&k, &n)| (k, n))
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

impl FromIterator<(u8, u8)> for KeyCodeMap {
    fn from_iter<I: IntoIterator<Item = (u8, u8)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (keycode, note) in iter {
            map.insert(keycode, note);
        }
        map
    }
}

/// A line of the mapping file that could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number
    pub line: usize,
    /// The offending text (the part that failed to parse)
    pub text: String,
}

/// Result of parsing a mapping file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedKeymap {
    pub map: KeyCodeMap,
    pub rejected: Vec<RejectedLine>,
}

/// Parse mapping file content. Never fails; bad lines end up in `rejected`.
pub fn parse_keymap(content: &str) -> ParsedKeymap {
    let mut parsed = ParsedKeymap::default();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.split(';').next().unwrap_or("");

        let Some((kc_str, note_str)) = line.split_once('=') else {
            if !line.trim().is_empty() {
                parsed.rejected.push(RejectedLine { line: idx + 1, text: line.to_string() });
            }
            continue;
        };

        let keycode = match kc_str.trim().parse::<u8>() {
            Ok(kc) => kc,
            Err(_) => {
                parsed.rejected.push(RejectedLine { line: idx + 1, text: kc_str.to_string() });
                continue;
            }
        };
        let note = match note_str.trim().parse::<u64>() {
            Ok(note) => (note & u64::from(NOTE_MASK)) as u8,
            Err(_) => {
                parsed.rejected.push(RejectedLine { line: idx + 1, text: note_str.to_string() });
                continue;
            }
        };

        log::debug!("kc {} :> note #{} ({})", keycode, note, note_name(note));
        parsed.map.insert(keycode, note);
    }

    parsed
}

/// Convert a MIDI note number to a note name
pub fn note_name(note: u8) -> String {
    let names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i8 - 1;
    let name = names[(note % 12) as usize];
    format!("{}{}", name, octave)
}
