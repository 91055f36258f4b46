//! Error types for xkb2midi

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for xkb2midi operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in xkb2midi
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The keymap file does not exist
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// MIDI backend error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// JACK connection error
    #[error("JACK error: {0}")]
    Jack(#[from] jack::Error),

    /// Could not open the X display
    #[error("X11 connect error: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    /// The X connection broke while sending a request
    #[error("X11 connection error: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    /// The X server answered a request with an error
    #[error("X11 reply error: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    /// The server lacks a usable XKB extension
    #[error("X Keyboard Extension not supported by the server")]
    XkbUnsupported,

    /// A single key could not be bound
    #[error("Unable to bind keycode {keycode:#04x}: {reason}")]
    Binding { keycode: u8, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
