//! Configuration file support for xkb2midi
//!
//! Two files are involved:
//! - the keymap, `~/.config/xkb2midi.cfg` by default (see [`crate::keymap`])
//! - optional JACK settings in TOML, `~/.config/xkb2midi/settings.toml`

use crate::error::{Error, Result};
use crate::keymap::{parse_keymap, KeyCodeMap};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default velocity for every note
pub const DEFAULT_VELOCITY: u8 = 100;

/// Default JACK client name
pub const DEFAULT_CLIENT_NAME: &str = "xkb2midi";

/// File name of the keymap inside the user config directory
pub const KEYMAP_FILE_NAME: &str = "xkb2midi.cfg";

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// MIDI configuration
    pub midi: MidiSettings,
}

impl Settings {
    /// Load settings from an explicit path. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default location, falling back to defaults
    /// if there is no settings file.
    pub fn load_default() -> Result<Self> {
        let path = Self::settings_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default settings file path
    pub fn settings_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "xkb2midi") {
            Ok(proj_dirs.config_dir().join("settings.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }
}

/// MIDI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// JACK client name
    pub client_name: String,
    /// MIDI output port name
    pub port_name: String,
    /// Velocity sent with every note on and off (1-127)
    pub velocity: u8,
    /// Auto-connect to these JACK MIDI inputs
    pub auto_connect: Vec<String>,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            port_name: "out".to_string(),
            velocity: DEFAULT_VELOCITY,
            auto_connect: Vec::new(),
        }
    }
}

/// Get the default keymap path
pub fn default_keymap_path() -> Result<PathBuf> {
    if let Some(base_dirs) = BaseDirs::new() {
        Ok(base_dirs.config_dir().join(KEYMAP_FILE_NAME))
    } else {
        Err(Error::Config("Could not determine config directory".to_string()))
    }
}

/// Read and parse a keymap file.
///
/// A missing file is fatal; unparsable lines are logged and skipped.
pub fn load_keymap(path: &Path) -> Result<KeyCodeMap> {
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }

    log::info!("Parsing: '{}'", path.display());
    let content = fs::read_to_string(path)?;
    let parsed = parse_keymap(&content);

    for rejected in &parsed.rejected {
        log::warn!("Unable to parse line {}: '{}'", rejected.line, rejected.text);
    }
    Ok(parsed.map)
}

/// Create a commented sample keymap at the default location
pub fn create_default_keymap_file() -> Result<PathBuf> {
    let path = default_keymap_path()?;
    write_sample_keymap(&path)?;
    Ok(path)
}

/// Write the sample keymap to `path`, refusing to overwrite an existing file
pub fn write_sample_keymap(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::Config(format!("{} already exists", path.display())));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = r#"; xkb2midi keymap
;
; One mapping per line: <X keycode> = <MIDI note>
; Keycodes can be looked up with `xev`. Notes are 0-127 (60 = middle C).
; Everything after a ';' is a comment.

; Home row of a US layout as one octave starting at middle C
38 = 60   ; a
39 = 62   ; s
40 = 64   ; d
41 = 65   ; f
42 = 67   ; g
43 = 69   ; h
44 = 71   ; j
45 = 72   ; k

; Black keys on the row above
25 = 61   ; w
26 = 63   ; e
28 = 66   ; t
29 = 68   ; y
30 = 70   ; u
"#;

    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.midi.client_name, "xkb2midi");
        assert_eq!(settings.midi.port_name, "out");
        assert_eq!(settings.midi.velocity, 100);
        assert!(settings.midi.auto_connect.is_empty());
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = toml::from_str("[midi]\nvelocity = 90\n").unwrap();
        assert_eq!(settings.midi.velocity, 90);
        assert_eq!(settings.midi.client_name, "xkb2midi");
    }

    #[test]
    fn test_settings_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.midi.auto_connect = vec!["synth:midi_in".to_string()];
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.midi.auto_connect, vec!["synth:midi_in".to_string()]);
    }

    #[test]
    fn test_missing_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    }

    #[test]
    fn test_load_keymap_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "; test keymap").unwrap();
        writeln!(file, "38=60").unwrap();
        writeln!(file, "not a mapping").unwrap();
        writeln!(file, "40 = 200").unwrap();

        let map = load_keymap(file.path()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.note_for(38), Some(60));
        assert_eq!(map.note_for(40), Some(72));
    }

    #[test]
    fn test_missing_keymap_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_keymap(&dir.path().join("missing.cfg"));
        assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    }

    #[test]
    fn test_sample_keymap_parses_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEYMAP_FILE_NAME);
        write_sample_keymap(&path).unwrap();

        let parsed = parse_keymap(&fs::read_to_string(&path).unwrap());
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.map.note_for(38), Some(60));
        assert_eq!(parsed.map.len(), 13);

        assert!(write_sample_keymap(&path).is_err());
    }
}
