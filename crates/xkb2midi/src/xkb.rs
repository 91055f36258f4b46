//! X11 keyboard backend using the X Keyboard Extension
//!
//! Speaks the XKB protocol directly over an `x11rb` connection: GetMap to
//! read key symbols and actions, SetMap to rewrite one key's actions, and
//! SelectEvents for action messages and map changes.

use crate::device::{KeyAction, KeyActionTable, KeyboardDevice, Notification};
use crate::error::{Error, Result};
use x11rb::connection::Connection;
use x11rb::errors::ConnectionError;
use x11rb::protocol::xkb::{self, ConnectionExt as _};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::{Serialize, TryParse};

/// XKB protocol version we speak
const XKB_MAJOR_VERSION: u16 = 1;
const XKB_MINOR_VERSION: u16 = 0;

/// Every map component, used when (de)selecting map notifications
const ALL_MAP_PARTS: u16 = 0x00ff;

/// A keyboard device on an X server
pub struct XkbKeyboard {
    conn: RustConnection,
    device_spec: u16,
}

impl XkbKeyboard {
    /// Connect to `display` (or `$DISPLAY`) and enable XKB for `device_spec`
    pub fn connect(display: Option<&str>, device_spec: u16) -> Result<Self> {
        let (conn, _screen) = x11rb::connect(display)?;

        let reply = conn
            .xkb_use_extension(XKB_MAJOR_VERSION, XKB_MINOR_VERSION)?
            .reply()?;
        if !reply.supported {
            return Err(Error::XkbUnsupported);
        }
        log::info!(
            "Connected to X server, XKB {}.{}",
            reply.server_major,
            reply.server_minor
        );

        Ok(Self { conn, device_spec })
    }

    pub fn device_spec(&self) -> u16 {
        self.device_spec
    }

    fn get_map(&self, full: xkb::MapPart) -> Result<xkb::GetMapReply> {
        let reply = self
            .conn
            .xkb_get_map(
                self.device_spec,
                full,
                xkb::MapPart::from(0u16),
                0, // first type
                0,
                0, // first key sym
                0,
                0, // first key action
                0,
                0, // first key behavior
                0,
                xkb::VMod::from(0u16),
                0, // first key explicit
                0,
                0, // first modmap key
                0,
                0, // first vmodmap key
                0,
            )?
            .reply()?;
        Ok(reply)
    }

    /// Change event selection the way XkbSelectEvents does: events in
    /// `affect` are switched on if also in `values`, off otherwise.
    fn select_events(&self, affect: u16, values: u16) -> Result<()> {
        let selection = EventSelection::new(affect, values);
        self.conn
            .xkb_select_events(
                self.device_spec,
                xkb::EventType::from(selection.clear),
                xkb::EventType::from(selection.select_all),
                xkb::MapPart::from(selection.affect_map),
                xkb::MapPart::from(selection.map),
                &xkb::SelectEventsAux::new(),
            )?
            .check()?;
        Ok(())
    }
}

/// Arguments of one SelectEvents request. The server treats
/// `clear | select_all` as the set of affected events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventSelection {
    clear: u16,
    select_all: u16,
    affect_map: u16,
    map: u16,
}

impl EventSelection {
    fn new(affect: u16, values: u16) -> Self {
        let map_notify = u16::from(xkb::EventType::MAP_NOTIFY);
        let clear = affect & !values;
        let select_all = affect & values;

        let (affect_map, map) = if affect & map_notify != 0 {
            let map = if select_all & map_notify != 0 { ALL_MAP_PARTS } else { 0 };
            (ALL_MAP_PARTS, map)
        } else {
            (0, 0)
        };

        Self { clear, select_all, affect_map, map }
    }
}

fn to_key_action(action: &xkb::Action) -> KeyAction {
    KeyAction::from_bytes(action.serialize())
}

fn to_xkb_action(action: &KeyAction) -> Result<xkb::Action> {
    let bytes = action.to_bytes();
    let (parsed, _rest) = xkb::Action::try_parse(&bytes).map_err(ConnectionError::from)?;
    Ok(parsed)
}

/// Build a table from a GetMap reply carrying key symbols and actions
fn table_from_reply(device_spec: u16, reply: &xkb::GetMapReply) -> KeyActionTable {
    let mut table = KeyActionTable::new(device_spec, reply.min_key_code, reply.max_key_code);

    if let Some(sym_maps) = &reply.map.syms_rtrn {
        for (keycode, sym_map) in (reply.first_key_sym..=u8::MAX).zip(sym_maps) {
            table.set_num_syms(keycode, sym_map.syms.len());
        }
    }

    if let Some(acts) = &reply.map.key_actions {
        let mut actions = acts.acts_rtrn_acts.iter();
        for (keycode, &count) in (reply.first_key_action..=u8::MAX).zip(&acts.acts_rtrn_count) {
            let key_actions = actions
                .by_ref()
                .take(usize::from(count))
                .map(to_key_action)
                .collect();
            table.set_actions(keycode, key_actions);
        }
    }

    table
}

impl KeyboardDevice for XkbKeyboard {
    fn fetch_key_actions(&mut self) -> Result<KeyActionTable> {
        let reply = self.get_map(xkb::MapPart::KEY_SYMS | xkb::MapPart::KEY_ACTIONS)?;
        Ok(table_from_reply(self.device_spec, &reply))
    }

    fn commit_key_actions(&mut self, table: &KeyActionTable, keycode: u8) -> Result<()> {
        let actions = table
            .key_actions(keycode)
            .iter()
            .map(to_xkb_action)
            .collect::<Result<Vec<_>>>()?;
        let count = u8::try_from(actions.len()).map_err(|_| Error::Binding {
            keycode,
            reason: format!("{} actions do not fit in one request", actions.len()),
        })?;

        let values = xkb::SetMapAux::new().key_actions(xkb::SetMapAuxKeyActions {
            actions_count: vec![count],
            actions,
        });

        self.conn
            .xkb_set_map(
                self.device_spec,
                xkb::SetMapFlags::from(0u16),
                table.min_keycode(),
                table.max_keycode(),
                0, // first type
                0,
                0, // first key sym
                0,
                0,
                keycode, // first key action
                1,
                u16::from(count),
                0, // first key behavior
                0,
                0,
                0, // first key explicit
                0,
                0,
                0, // first modmap key
                0,
                0,
                0, // first vmodmap key
                0,
                0,
                xkb::VMod::from(0u16),
                &values,
            )?
            .check()?;
        Ok(())
    }

    fn select_notifications(&mut self) -> Result<()> {
        let events = u16::from(
            xkb::EventType::ACTION_MESSAGE
                | xkb::EventType::MAP_NOTIFY
                | xkb::EventType::NEW_KEYBOARD_NOTIFY,
        );
        self.select_events(events, events)
    }

    fn set_map_notify(&mut self, enabled: bool) -> Result<()> {
        let map_notify = u16::from(xkb::EventType::MAP_NOTIFY);
        self.select_events(map_notify, if enabled { map_notify } else { 0 })
    }

    /// Nothing to refresh: there is no client-side keysym cache, and the
    /// binder fetches a fresh map right after.
    fn refresh_keyboard_mapping(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_notification(&mut self) -> Result<Notification> {
        let event = self.conn.wait_for_event()?;
        let notification = match event {
            Event::XkbActionMessage(ev) => Notification::ActionMessage {
                keycode: ev.keycode,
                press: ev.press,
            },
            Event::XkbMapNotify(_) => Notification::MapNotify,
            Event::XkbNewKeyboardNotify(ev) => Notification::NewKeyboardNotify {
                device_id: ev.device_id,
                old_device_id: ev.old_device_id,
            },
            Event::Error(err) => {
                log::warn!("X11 error: {:?}", err);
                Notification::Other(format!("{:?}", err.error_kind))
            }
            other => Notification::Other(format!("{:?}", other)),
        };
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MessageFlags;

    const ACTION_MESSAGE: u16 = 1 << 9;
    const MAP_NOTIFY: u16 = 1 << 1;
    const NEW_KEYBOARD_NOTIFY: u16 = 1 << 0;

    #[test]
    fn test_select_all_notifications() {
        let events = ACTION_MESSAGE | MAP_NOTIFY | NEW_KEYBOARD_NOTIFY;
        let selection = EventSelection::new(events, events);
        assert_eq!(selection.clear, 0);
        assert_eq!(selection.select_all, events);
        assert_eq!(selection.affect_map, ALL_MAP_PARTS);
        assert_eq!(selection.map, ALL_MAP_PARTS);
    }

    #[test]
    fn test_disable_map_notify_only_clears_it() {
        let selection = EventSelection::new(MAP_NOTIFY, 0);
        assert_eq!(selection.clear, MAP_NOTIFY);
        assert_eq!(selection.select_all, 0);
        assert_eq!(selection.clear | selection.select_all, MAP_NOTIFY);
        assert_eq!(selection.affect_map, ALL_MAP_PARTS);
        assert_eq!(selection.map, 0);
    }

    #[test]
    fn test_reenable_map_notify() {
        let selection = EventSelection::new(MAP_NOTIFY, MAP_NOTIFY);
        assert_eq!(selection.clear, 0);
        assert_eq!(selection.select_all, MAP_NOTIFY);
        assert_eq!(selection.map, ALL_MAP_PARTS);
    }

    #[test]
    fn test_other_events_leave_map_parts_alone() {
        let selection = EventSelection::new(ACTION_MESSAGE, ACTION_MESSAGE);
        assert_eq!(selection.affect_map, 0);
        assert_eq!(selection.map, 0);
    }

    #[test]
    fn test_message_action_matches_xkb_layout() {
        let action = KeyAction::key_message(true);
        let wire = to_xkb_action(&action).unwrap();

        let message = wire.as_message();
        assert_eq!(u8::from(message.type_), 0x10);
        assert_eq!(
            u8::from(message.flags),
            u8::from(
                xkb::ActionMessageFlag::ON_PRESS
                    | xkb::ActionMessageFlag::ON_RELEASE
                    | xkb::ActionMessageFlag::GEN_KEY_EVENT
            )
        );
        assert_eq!(message.message, *b"!\0\0\0\0\0");
        assert_eq!(
            MessageFlags::ON_PRESS | MessageFlags::ON_RELEASE | MessageFlags::GEN_KEY_EVENT,
            action.message_flags().unwrap()
        );
        assert_eq!(to_key_action(&wire), action);
    }
}
