//! Installs message actions on mapped keys
//!
//! Every mapped key gets a message action in its first action slot that
//! fires on press and release. The input extension then reports those keys
//! as action messages, regardless of which window has focus.

use crate::device::{KeyAction, KeyActionTable, KeyboardDevice};
use crate::error::{Error, Result};
use crate::keymap::KeyCodeMap;

/// Bind every key in `keymap` on `device`.
///
/// Always starts from a freshly fetched table, so it is safe to call again
/// after the device replaced its map. A key that cannot be bound is logged
/// and skipped. The returned table is the only valid view of the device's
/// actions until the next map change; earlier tables are stale.
pub fn bind_keys<D>(device: &mut D, keymap: &KeyCodeMap, generate_events: bool) -> Result<KeyActionTable>
where
    D: KeyboardDevice + ?Sized,
{
    let mut table = device.fetch_key_actions()?;
    let action = KeyAction::key_message(generate_events);

    let mut bound = 0;
    for keycode in keymap.keycodes() {
        match bind_key(device, &mut table, keycode, action) {
            Ok(()) => bound += 1,
            Err(e) => log::warn!("{}", e),
        }
    }

    log::info!(
        "Bound {} of {} mapped key(s) on device {:#x}",
        bound,
        keymap.len(),
        table.device_spec()
    );
    Ok(table)
}

fn bind_key<D>(device: &mut D, table: &mut KeyActionTable, keycode: u8, action: KeyAction) -> Result<()>
where
    D: KeyboardDevice + ?Sized,
{
    if table.action_entry(keycode).is_none() {
        log::info!("Adding XKB action to keycode {:#04x}", keycode);
        table
            .resize_key_actions(keycode, 1)
            .ok_or_else(|| Error::Binding {
                keycode,
                reason: "unable to resize action field".to_string(),
            })?;
    }

    let entry = table.action_entry_mut(keycode).ok_or_else(|| Error::Binding {
        keycode,
        reason: "no action slot".to_string(),
    })?;
    *entry = action;

    device
        .commit_key_actions(table, keycode)
        .map_err(|e| match e {
            Error::Binding { .. } => e,
            other => Error::Binding {
                keycode,
                reason: format!("unable to add action: {}", other),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::FakeKeyboard;
    use crate::device::MessageFlags;

    fn keymap() -> KeyCodeMap {
        [(38, 60), (39, 62), (41, 65)].into_iter().collect()
    }

    #[test]
    fn test_binds_every_mapped_key() {
        let mut device = FakeKeyboard::new(2);
        let table = bind_keys(&mut device, &keymap(), true).unwrap();

        for kc in [38, 39, 41] {
            assert_eq!(device.server.message_action_count(kc), 1, "keycode {}", kc);
            assert_eq!(table.message_action_count(kc), 1);
            let flags = device.server.action_entry(kc).unwrap().message_flags().unwrap();
            assert!(flags.contains(MessageFlags::ON_PRESS | MessageFlags::ON_RELEASE));
            assert!(flags.contains(MessageFlags::GEN_KEY_EVENT));
        }
        assert_eq!(device.server.message_action_count(40), 0);
        assert!(device.server.key_actions(40).is_empty());
    }

    #[test]
    fn test_unmap_flag_suppresses_key_events() {
        let mut device = FakeKeyboard::new(1);
        bind_keys(&mut device, &keymap(), false).unwrap();

        let flags = device.server.action_entry(38).unwrap().message_flags().unwrap();
        assert!(!flags.contains(MessageFlags::GEN_KEY_EVENT));
    }

    #[test]
    fn test_binding_twice_is_idempotent() {
        let mut device = FakeKeyboard::new(2);
        bind_keys(&mut device, &keymap(), true).unwrap();
        let table = bind_keys(&mut device, &keymap(), true).unwrap();

        for kc in [38, 39, 41] {
            assert_eq!(device.server.message_action_count(kc), 1);
            assert_eq!(device.server.key_actions(kc).len(), 2);
        }
        assert_eq!(table.message_action_count(40), 0);
        assert_eq!(device.fetches, 2);
    }

    #[test]
    fn test_existing_action_slot_is_overwritten() {
        let mut device = FakeKeyboard::new(2);
        let other = KeyAction::from_bytes([0x01, 0, 0, 0, 0, 0, 0, 0]);
        device.server.set_actions(38, vec![other, other]);

        bind_keys(&mut device, &keymap(), true).unwrap();

        let actions = device.server.key_actions(38);
        assert!(actions[0].is_message());
        assert_eq!(actions[1], other);
    }

    #[test]
    fn test_rejected_key_does_not_stop_others() {
        let mut device = FakeKeyboard::new(1);
        device.reject.insert(39);

        bind_keys(&mut device, &keymap(), true).unwrap();

        assert_eq!(device.server.message_action_count(38), 1);
        assert_eq!(device.server.message_action_count(39), 0);
        assert_eq!(device.server.message_action_count(41), 1);
    }

    #[test]
    fn test_unresizable_key_is_skipped() {
        let mut device = FakeKeyboard::new(1);
        device.server.set_num_syms(39, 0);
        let map: KeyCodeMap = [(38, 60), (39, 62), (200, 64)].into_iter().collect();

        let table = bind_keys(&mut device, &map, true).unwrap();

        assert_eq!(table.message_action_count(38), 1);
        assert_eq!(table.message_action_count(39), 0);
        assert_eq!(device.commits, vec![38]);
    }

    #[test]
    fn test_rebind_after_map_replacement() {
        let mut device = FakeKeyboard::new(2);
        bind_keys(&mut device, &keymap(), true).unwrap();

        device.replace_map();
        assert_eq!(device.server.message_action_count(38), 0);

        bind_keys(&mut device, &keymap(), true).unwrap();
        for kc in [38, 39, 41] {
            assert_eq!(device.server.message_action_count(kc), 1);
        }
    }
}
