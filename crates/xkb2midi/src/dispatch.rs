//! The notification loop
//!
//! Runs on the thread that set up the X connection. Action messages become
//! MIDI events; map changes trigger a rebind of all mapped keys.

use crate::binder::bind_keys;
use crate::config::DEFAULT_VELOCITY;
use crate::device::{KeyActionTable, KeyboardDevice, Notification};
use crate::error::Result;
use crate::keymap::{KeyCodeMap, NOTE_MASK};
use crate::midi::{MidiEvent, MidiOutput};

/// What handling one notification led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// An event was queued for output
    Queued(MidiEvent),
    /// An event was produced but the output queue was full
    Dropped(MidiEvent),
    /// All mapped keys were bound again
    Rebound,
    /// The map changed but binding again failed; no keys are bound
    RebindFailed,
    /// Nothing to do
    Ignored,
}

/// Routes device notifications to the MIDI output and the binder
pub struct Dispatcher<D, O> {
    device: D,
    output: O,
    keymap: KeyCodeMap,
    generate_events: bool,
    velocity: u8,
    /// Key actions installed by the last successful bind
    table: Option<KeyActionTable>,
}

impl<D: KeyboardDevice, O: MidiOutput> Dispatcher<D, O> {
    pub fn new(device: D, output: O, keymap: KeyCodeMap, generate_events: bool) -> Self {
        Self {
            device,
            output,
            keymap,
            generate_events,
            velocity: DEFAULT_VELOCITY,
            table: None,
        }
    }

    /// Velocity used for every note on and off, masked to 7 bits
    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity & NOTE_MASK;
        self
    }

    /// Initial bind. Fails if the device map cannot be fetched.
    pub fn bind(&mut self) -> Result<()> {
        self.table = None;
        self.table = Some(bind_keys(&mut self.device, &self.keymap, self.generate_events)?);
        Ok(())
    }

    /// Handle notifications until the device stops delivering them
    pub fn run(&mut self) -> Result<()> {
        loop {
            let notification = self.device.next_notification()?;
            self.handle(notification)?;
        }
    }

    /// Handle one notification
    pub fn handle(&mut self, notification: Notification) -> Result<Dispatched> {
        match notification {
            Notification::ActionMessage { keycode, press } => {
                log::trace!("Action message: keycode {} {}", keycode, if press { "down" } else { "up" });
                let Some(note) = self.keymap.note_for(keycode) else {
                    return Ok(Dispatched::Ignored);
                };
                let event = MidiEvent::encode(press, note, self.velocity);
                if self.output.submit_event(event) {
                    Ok(Dispatched::Queued(event))
                } else {
                    Ok(Dispatched::Dropped(event))
                }
            }
            Notification::NewKeyboardNotify { device_id, old_device_id } if device_id != old_device_id => {
                log::debug!("New keyboard {} replaced {}, not rebinding", device_id, old_device_id);
                Ok(Dispatched::Ignored)
            }
            Notification::MapNotify | Notification::NewKeyboardNotify { .. } => {
                if self.rebind()? {
                    Ok(Dispatched::Rebound)
                } else {
                    Ok(Dispatched::RebindFailed)
                }
            }
            Notification::Other(description) => {
                log::debug!("Unknown xkb event: {}", description);
                Ok(Dispatched::Ignored)
            }
        }
    }

    /// Rebind with map-change notifications switched off, so our own
    /// changes do not bounce back as further map notifications.
    ///
    /// Returns whether binding succeeded. A failure is logged and leaves no
    /// table, and the loop keeps running.
    fn rebind(&mut self) -> Result<bool> {
        self.device.set_map_notify(false)?;
        self.table = None;

        if let Err(e) = self.device.refresh_keyboard_mapping() {
            log::warn!("Failed to refresh keyboard mapping: {}", e);
        }
        let bound = match bind_keys(&mut self.device, &self.keymap, self.generate_events) {
            Ok(table) => {
                self.table = Some(table);
                true
            }
            Err(e) => {
                log::error!("Rebinding keys failed: {}", e);
                false
            }
        };

        self.device.set_map_notify(true)?;
        Ok(bound)
    }

    /// Key actions of the current binding, if any
    pub fn table(&self) -> Option<&KeyActionTable> {
        self.table.as_ref()
    }

    pub fn keymap(&self) -> &KeyCodeMap {
        &self.keymap
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
