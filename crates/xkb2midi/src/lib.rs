//! xkb2midi - play MIDI notes on a dedicated X11 keyboard
//!
//! Rebinds the keys of one XKB keyboard device so that pressing or releasing
//! them produces XKB action messages instead of going through normal text
//! input. Each message is turned into a JACK MIDI note on/off. The program
//! does not need window focus.
//!
//! - [`keymap`]: keycode to note mapping and its file format
//! - [`device`]: key action tables and the [`KeyboardDevice`] abstraction
//! - [`binder`]: installs message actions on mapped keys
//! - [`dispatch`]: the notification loop
//! - [`queue`]: lock-free queue between the loop and the audio callback
//! - [`midi`]: note events and the JACK output
//! - [`xkb`]: the X11 implementation of [`KeyboardDevice`]
//!
//! # Usage as a Library
//!
//! ```no_run
//! use xkb2midi::{Dispatcher, JackMidiOutput, XkbKeyboard, KeyboardDevice};
//!
//! let keymap = xkb2midi::keymap::parse_keymap("38 = 60\n39 = 62\n").map;
//! let keyboard = XkbKeyboard::connect(None, 3)?;
//! let output = JackMidiOutput::new("xkb2midi", "out")?;
//!
//! let mut dispatcher = Dispatcher::new(keyboard, output, keymap, true);
//! dispatcher.bind()?;
//! dispatcher.output_mut().activate();
//! dispatcher.device_mut().select_notifications()?;
//! dispatcher.run()?;
//! # Ok::<(), xkb2midi::Error>(())
//! ```

pub mod binder;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod keymap;
pub mod midi;
pub mod queue;
pub mod xkb;

// Re-export main types
pub use binder::bind_keys;
pub use config::{MidiSettings, Settings, DEFAULT_VELOCITY};
pub use device::{KeyAction, KeyActionTable, KeyboardDevice, Notification, XKB_USE_CORE_KBD};
pub use dispatch::{Dispatched, Dispatcher};
pub use error::{Error, Result};
pub use keymap::{KeyCodeMap, note_name};
pub use midi::{JackMidiOutput, MidiEvent, MidiOutput};
pub use queue::{event_queue, EventConsumer, EventProducer, DEFAULT_QUEUE_CAPACITY};
pub use xkb::XkbKeyboard;
