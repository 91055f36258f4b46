//! Key actions of one XKB keyboard device
//!
//! [`KeyActionTable`] is a local copy of the device's per-key action slots.
//! The server owns the real map and may replace it at any time, so a table
//! is only good until the next map change: fetch a fresh one through
//! [`KeyboardDevice::fetch_key_actions`] instead of keeping one around.

use crate::error::Result;

/// XKB device spec selecting the core keyboard
pub const XKB_USE_CORE_KBD: u16 = 0x0100;

/// Size of one XKB action on the wire
pub const ACTION_SIZE: usize = 8;

/// Payload bytes carried by a message action
pub const MESSAGE_LENGTH: usize = 6;

/// Action type: no action
pub const SA_NO_ACTION: u8 = 0x00;

/// Action type: send an ActionMessage event to interested clients
pub const SA_ACTION_MESSAGE: u8 = 0x10;

/// Payload installed on every bound key. The keycode travels in the
/// notification itself, so the payload carries no per-key data.
pub const BIND_MESSAGE: &[u8] = b"!";

/// Flags of a message action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// Send a message when the key goes down
    pub const ON_PRESS: Self = Self(0x01);
    /// Send a message when the key goes up
    pub const ON_RELEASE: Self = Self(0x02);
    /// Also deliver the ordinary key event
    pub const GEN_KEY_EVENT: Self = Self(0x04);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One XKB key action in its 8-byte wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyAction([u8; ACTION_SIZE]);

impl KeyAction {
    /// The empty action
    pub const NONE: Self = Self([0; ACTION_SIZE]);

    /// A message action; `payload` is truncated to six bytes
    pub fn message(flags: MessageFlags, payload: &[u8]) -> Self {
        let mut bytes = [0u8; ACTION_SIZE];
        bytes[0] = SA_ACTION_MESSAGE;
        bytes[1] = flags.bits();
        let len = payload.len().min(MESSAGE_LENGTH);
        bytes[2..2 + len].copy_from_slice(&payload[..len]);
        Self(bytes)
    }

    /// The action a bound key carries: message on press and release,
    /// optionally keeping the ordinary key event.
    pub fn key_message(generate_events: bool) -> Self {
        let mut flags = MessageFlags::ON_PRESS | MessageFlags::ON_RELEASE;
        if generate_events {
            flags |= MessageFlags::GEN_KEY_EVENT;
        }
        Self::message(flags, BIND_MESSAGE)
    }

    pub fn from_bytes(bytes: [u8; ACTION_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; ACTION_SIZE] {
        self.0
    }

    pub fn action_type(&self) -> u8 {
        self.0[0]
    }

    pub fn is_message(&self) -> bool {
        self.action_type() == SA_ACTION_MESSAGE
    }

    pub fn message_flags(&self) -> Option<MessageFlags> {
        self.is_message().then(|| MessageFlags(self.0[1]))
    }

    pub fn message_payload(&self) -> Option<&[u8]> {
        self.is_message().then(|| &self.0[2..])
    }
}

/// Symbols and actions of a single key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEntry {
    /// Number of keysyms (groups times width); XKB sizes the action slots
    /// of a key by this number
    pub num_syms: usize,
    /// Action slots, empty if the key has no actions
    pub actions: Vec<KeyAction>,
}

/// Local copy of one device's key actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyActionTable {
    device_spec: u16,
    min_keycode: u8,
    max_keycode: u8,
    keys: Vec<KeyEntry>,
}

impl KeyActionTable {
    /// Empty table for keycodes `min_keycode..=max_keycode`
    pub fn new(device_spec: u16, min_keycode: u8, max_keycode: u8) -> Self {
        let count = usize::from(max_keycode.saturating_sub(min_keycode)) + 1;
        Self {
            device_spec,
            min_keycode,
            max_keycode,
            keys: vec![KeyEntry::default(); count],
        }
    }

    pub fn device_spec(&self) -> u16 {
        self.device_spec
    }

    pub fn min_keycode(&self) -> u8 {
        self.min_keycode
    }

    pub fn max_keycode(&self) -> u8 {
        self.max_keycode
    }

    fn index(&self, keycode: u8) -> Option<usize> {
        (self.min_keycode..=self.max_keycode)
            .contains(&keycode)
            .then(|| usize::from(keycode - self.min_keycode))
    }

    pub fn key(&self, keycode: u8) -> Option<&KeyEntry> {
        self.index(keycode).map(|i| &self.keys[i])
    }

    pub fn key_mut(&mut self, keycode: u8) -> Option<&mut KeyEntry> {
        self.index(keycode).map(move |i| &mut self.keys[i])
    }

    /// Set the symbol count of a key; out-of-range keycodes are ignored
    pub fn set_num_syms(&mut self, keycode: u8, num_syms: usize) {
        if let Some(key) = self.key_mut(keycode) {
            key.num_syms = num_syms;
        }
    }

    /// Replace the action slots of a key; out-of-range keycodes are ignored
    pub fn set_actions(&mut self, keycode: u8, actions: Vec<KeyAction>) {
        if let Some(key) = self.key_mut(keycode) {
            key.actions = actions;
        }
    }

    /// Action slots of a key, empty for unknown keys
    pub fn key_actions(&self, keycode: u8) -> &[KeyAction] {
        self.key(keycode).map(|k| k.actions.as_slice()).unwrap_or(&[])
    }

    /// First action slot (group 1, shift level 1) of a key
    pub fn action_entry(&self, keycode: u8) -> Option<&KeyAction> {
        self.key(keycode).and_then(|k| k.actions.first())
    }

    pub fn action_entry_mut(&mut self, keycode: u8) -> Option<&mut KeyAction> {
        self.key_mut(keycode).and_then(|k| k.actions.first_mut())
    }

    /// Make room for at least `needed` actions on a key.
    ///
    /// New slots are empty actions. XKB keeps exactly one slot per keysym,
    /// so the key grows to its symbol count; a key without symbols cannot
    /// hold actions and `None` is returned, as for an unknown keycode.
    pub fn resize_key_actions(&mut self, keycode: u8, needed: usize) -> Option<&mut [KeyAction]> {
        let key = self.key_mut(keycode)?;
        if key.actions.len() < needed {
            if key.num_syms == 0 {
                return None;
            }
            key.actions.resize(needed.max(key.num_syms), KeyAction::NONE);
        }
        Some(key.actions.as_mut_slice())
    }

    /// Number of message actions installed on a key
    pub fn message_action_count(&self, keycode: u8) -> usize {
        self.key_actions(keycode).iter().filter(|a| a.is_message()).count()
    }
}

/// Notifications the dispatch loop reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A key carrying a message action went down or up
    ActionMessage { keycode: u8, press: bool },
    /// The device's key map changed
    MapNotify,
    /// The device behind a device id was replaced
    NewKeyboardNotify { device_id: u8, old_device_id: u8 },
    /// Anything else, described for logging
    Other(String),
}

/// A keyboard whose key actions can be read and rewritten
pub trait KeyboardDevice {
    /// Fetch the current key symbols and actions from the device
    fn fetch_key_actions(&mut self) -> Result<KeyActionTable>;

    /// Apply the action slots of one key from `table` to the device
    fn commit_key_actions(&mut self, table: &KeyActionTable, keycode: u8) -> Result<()>;

    /// Subscribe to action messages, map changes and keyboard replacement
    fn select_notifications(&mut self) -> Result<()>;

    /// Turn map-change notifications on or off
    fn set_map_notify(&mut self, enabled: bool) -> Result<()>;

    /// Refresh whatever local view of the key map the device keeps
    fn refresh_keyboard_mapping(&mut self) -> Result<()>;

    /// Block until the next notification arrives
    fn next_notification(&mut self) -> Result<Notification>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory keyboard for exercising the binder and dispatch loop

    use super::*;
    use crate::error::Error;
    use std::collections::{HashSet, VecDeque};

    pub(crate) const FAKE_DEVICE: u16 = 3;

    /// Keyboard whose "server side" map is a plain table
    pub(crate) struct FakeKeyboard {
        pub server: KeyActionTable,
        /// Bumped whenever the device replaces its map
        pub generation: u32,
        /// Keycodes whose changes the device refuses
        pub reject: HashSet<u8>,
        /// Make every map fetch fail
        pub fail_fetch: bool,
        pub map_notify: bool,
        pub map_notify_history: Vec<bool>,
        pub fetches: usize,
        pub refreshes: usize,
        pub commits: Vec<u8>,
        pub pending: VecDeque<Notification>,
    }

    impl FakeKeyboard {
        /// Keycodes 8..=80, each with `syms` symbols and no actions
        pub fn new(syms: usize) -> Self {
            let mut server = KeyActionTable::new(FAKE_DEVICE, 8, 80);
            for kc in 8..=80 {
                server.set_num_syms(kc, syms);
            }
            Self {
                server,
                generation: 0,
                reject: HashSet::new(),
                fail_fetch: false,
                map_notify: false,
                map_notify_history: Vec::new(),
                fetches: 0,
                refreshes: 0,
                commits: Vec::new(),
                pending: VecDeque::new(),
            }
        }

        /// Swap in a brand new map: same symbols, all actions gone
        pub fn replace_map(&mut self) {
            let mut fresh = KeyActionTable::new(
                self.server.device_spec(),
                self.server.min_keycode(),
                self.server.max_keycode(),
            );
            for kc in self.server.min_keycode()..=self.server.max_keycode() {
                let syms = self.server.key(kc).map(|k| k.num_syms).unwrap_or(0);
                fresh.set_num_syms(kc, syms);
            }
            self.server = fresh;
            self.generation += 1;
        }

        pub fn push(&mut self, notification: Notification) {
            self.pending.push_back(notification);
        }
    }

    impl KeyboardDevice for FakeKeyboard {
        fn fetch_key_actions(&mut self) -> Result<KeyActionTable> {
            self.fetches += 1;
            if self.fail_fetch {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "keyboard map unavailable",
                )));
            }
            Ok(self.server.clone())
        }

        fn commit_key_actions(&mut self, table: &KeyActionTable, keycode: u8) -> Result<()> {
            if self.reject.contains(&keycode) {
                return Err(Error::Binding { keycode, reason: "BadValue".to_string() });
            }
            let actions = table.key_actions(keycode).to_vec();
            self.server.set_actions(keycode, actions);
            self.commits.push(keycode);
            Ok(())
        }

        fn select_notifications(&mut self) -> Result<()> {
            self.map_notify = true;
            Ok(())
        }

        fn set_map_notify(&mut self, enabled: bool) -> Result<()> {
            self.map_notify = enabled;
            self.map_notify_history.push(enabled);
            Ok(())
        }

        fn refresh_keyboard_mapping(&mut self) -> Result<()> {
            self.refreshes += 1;
            Ok(())
        }

        fn next_notification(&mut self) -> Result<Notification> {
            self.pending.pop_front().ok_or_else(|| {
                Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no more notifications"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_action_layout() {
        let action = KeyAction::key_message(true);
        assert_eq!(action.to_bytes(), [0x10, 0x07, b'!', 0, 0, 0, 0, 0]);

        let action = KeyAction::key_message(false);
        assert_eq!(action.message_flags(), Some(MessageFlags::ON_PRESS | MessageFlags::ON_RELEASE));
        assert!(!action.message_flags().unwrap().contains(MessageFlags::GEN_KEY_EVENT));
        assert_eq!(action.message_payload(), Some(&b"!\0\0\0\0\0"[..]));
    }

    #[test]
    fn test_message_payload_truncated() {
        let action = KeyAction::message(MessageFlags::ON_PRESS, b"too long payload");
        assert_eq!(action.message_payload(), Some(&b"too lo"[..]));
    }

    #[test]
    fn test_none_is_not_a_message() {
        assert!(!KeyAction::NONE.is_message());
        assert_eq!(KeyAction::NONE.message_flags(), None);
    }

    #[test]
    fn test_table_range() {
        let table = KeyActionTable::new(1, 8, 255);
        assert!(table.key(7).is_none());
        assert!(table.key(8).is_some());
        assert!(table.key(255).is_some());
        assert!(table.key_actions(7).is_empty());
    }

    #[test]
    fn test_resize_grows_to_symbol_count() {
        let mut table = KeyActionTable::new(1, 8, 20);
        table.set_num_syms(10, 4);

        assert!(table.action_entry(10).is_none());
        let slots = table.resize_key_actions(10, 1).unwrap();
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().all(|a| *a == KeyAction::NONE));
        assert!(table.action_entry(10).is_some());
    }

    #[test]
    fn test_resize_keeps_existing_actions() {
        let mut table = KeyActionTable::new(1, 8, 20);
        table.set_num_syms(10, 2);
        let msg = KeyAction::key_message(true);
        table.set_actions(10, vec![msg, KeyAction::NONE]);

        let slots = table.resize_key_actions(10, 1).unwrap();
        assert_eq!(slots, &[msg, KeyAction::NONE]);
    }

    #[test]
    fn test_resize_fails_without_symbols() {
        let mut table = KeyActionTable::new(1, 8, 20);
        assert!(table.resize_key_actions(10, 1).is_none());
        assert!(table.resize_key_actions(30, 1).is_none());
    }

    #[test]
    fn test_message_action_count() {
        let mut table = KeyActionTable::new(1, 8, 20);
        table.set_actions(9, vec![KeyAction::key_message(false), KeyAction::NONE]);
        assert_eq!(table.message_action_count(9), 1);
        assert_eq!(table.message_action_count(10), 0);
    }
}
