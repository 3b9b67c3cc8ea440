//! Key-code vocabulary shared by the wire protocol, the profile store and
//! the remap rule engine.
//!
//! Physical keys use their USB HID usage id on the keyboard/keypad page
//! (0x07).  Actions that have no physical key of their own (brightness,
//! media transport, mission control, …) live in a virtual range starting at
//! `0x1_0000` so they can never collide with a HID usage id.
//!
//! A name that is not in [`KEY_CODES`] does not resolve, and a numeric code
//! that is not in the table is not a [`KeyCode`].  Nothing outside this
//! module can construct an unknown key.

use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A validated key code from the fixed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(u32);

/// Start of the virtual (non-HID) key range.
pub const VIRTUAL_KEY_BASE: u32 = 0x1_0000;

/// The complete name ↔ code vocabulary.
pub const KEY_CODES: &[(&str, u32)] = &[
    // Letters
    ("a", 0x04),
    ("b", 0x05),
    ("c", 0x06),
    ("d", 0x07),
    ("e", 0x08),
    ("f", 0x09),
    ("g", 0x0a),
    ("h", 0x0b),
    ("i", 0x0c),
    ("j", 0x0d),
    ("k", 0x0e),
    ("l", 0x0f),
    ("m", 0x10),
    ("n", 0x11),
    ("o", 0x12),
    ("p", 0x13),
    ("q", 0x14),
    ("r", 0x15),
    ("s", 0x16),
    ("t", 0x17),
    ("u", 0x18),
    ("v", 0x19),
    ("w", 0x1a),
    ("x", 0x1b),
    ("y", 0x1c),
    ("z", 0x1d),
    // Digits
    ("1", 0x1e),
    ("2", 0x1f),
    ("3", 0x20),
    ("4", 0x21),
    ("5", 0x22),
    ("6", 0x23),
    ("7", 0x24),
    ("8", 0x25),
    ("9", 0x26),
    ("0", 0x27),
    // Editing and punctuation
    ("return_or_enter", 0x28),
    ("escape", 0x29),
    ("delete_or_backspace", 0x2a),
    ("tab", 0x2b),
    ("spacebar", 0x2c),
    ("hyphen", 0x2d),
    ("equal_sign", 0x2e),
    ("open_bracket", 0x2f),
    ("close_bracket", 0x30),
    ("backslash", 0x31),
    ("non_us_pound", 0x32),
    ("semicolon", 0x33),
    ("quote", 0x34),
    ("grave_accent_and_tilde", 0x35),
    ("comma", 0x36),
    ("period", 0x37),
    ("slash", 0x38),
    ("caps_lock", 0x39),
    // Function row
    ("f1", 0x3a),
    ("f2", 0x3b),
    ("f3", 0x3c),
    ("f4", 0x3d),
    ("f5", 0x3e),
    ("f6", 0x3f),
    ("f7", 0x40),
    ("f8", 0x41),
    ("f9", 0x42),
    ("f10", 0x43),
    ("f11", 0x44),
    ("f12", 0x45),
    ("print_screen", 0x46),
    ("scroll_lock", 0x47),
    ("pause", 0x48),
    // Navigation
    ("insert", 0x49),
    ("home", 0x4a),
    ("page_up", 0x4b),
    ("delete_forward", 0x4c),
    ("end", 0x4d),
    ("page_down", 0x4e),
    ("right_arrow", 0x4f),
    ("left_arrow", 0x50),
    ("down_arrow", 0x51),
    ("up_arrow", 0x52),
    // Keypad
    ("keypad_num_lock", 0x53),
    ("keypad_slash", 0x54),
    ("keypad_asterisk", 0x55),
    ("keypad_hyphen", 0x56),
    ("keypad_plus", 0x57),
    ("keypad_enter", 0x58),
    ("keypad_1", 0x59),
    ("keypad_2", 0x5a),
    ("keypad_3", 0x5b),
    ("keypad_4", 0x5c),
    ("keypad_5", 0x5d),
    ("keypad_6", 0x5e),
    ("keypad_7", 0x5f),
    ("keypad_8", 0x60),
    ("keypad_9", 0x61),
    ("keypad_0", 0x62),
    ("keypad_period", 0x63),
    ("non_us_backslash", 0x64),
    ("application", 0x65),
    ("power", 0x66),
    ("keypad_equal_sign", 0x67),
    // Extended function row
    ("f13", 0x68),
    ("f14", 0x69),
    ("f15", 0x6a),
    ("f16", 0x6b),
    ("f17", 0x6c),
    ("f18", 0x6d),
    ("f19", 0x6e),
    ("f20", 0x6f),
    ("f21", 0x70),
    ("f22", 0x71),
    ("f23", 0x72),
    ("f24", 0x73),
    // Volume
    ("mute", 0x7f),
    ("volume_up", 0x80),
    ("volume_down", 0x81),
    // Modifiers
    ("left_control", 0xe0),
    ("left_shift", 0xe1),
    ("left_option", 0xe2),
    ("left_command", 0xe3),
    ("right_control", 0xe4),
    ("right_shift", 0xe5),
    ("right_option", 0xe6),
    ("right_command", 0xe7),
    // Virtual keys
    ("fn", VIRTUAL_KEY_BASE + 0x01),
    ("vk_consumer_brightness_down", VIRTUAL_KEY_BASE + 0x10),
    ("vk_consumer_brightness_up", VIRTUAL_KEY_BASE + 0x11),
    ("vk_consumer_illumination_down", VIRTUAL_KEY_BASE + 0x12),
    ("vk_consumer_illumination_up", VIRTUAL_KEY_BASE + 0x13),
    ("vk_consumer_previous", VIRTUAL_KEY_BASE + 0x14),
    ("vk_consumer_play", VIRTUAL_KEY_BASE + 0x15),
    ("vk_consumer_next", VIRTUAL_KEY_BASE + 0x16),
    ("vk_mission_control", VIRTUAL_KEY_BASE + 0x17),
    ("vk_launchpad", VIRTUAL_KEY_BASE + 0x18),
    ("vk_dashboard", VIRTUAL_KEY_BASE + 0x19),
];

fn by_name() -> &'static HashMap<&'static str, u32> {
    static INDEX: OnceLock<HashMap<&'static str, u32>> = OnceLock::new();
    INDEX.get_or_init(|| KEY_CODES.iter().copied().collect())
}

fn by_code() -> &'static HashMap<u32, &'static str> {
    static INDEX: OnceLock<HashMap<u32, &'static str>> = OnceLock::new();
    INDEX.get_or_init(|| KEY_CODES.iter().map(|&(name, code)| (code, name)).collect())
}

impl KeyCode {
    /// Resolve a key name such as `"caps_lock"`.  Names are exact and
    /// case-sensitive, matching the persisted profile format.
    pub fn from_name(name: &str) -> Option<Self> {
        by_name().get(name).copied().map(KeyCode)
    }

    /// Validate a raw numeric code received over the wire.
    pub fn from_raw(code: u32) -> Option<Self> {
        by_code().contains_key(&code).then_some(KeyCode(code))
    }

    /// Numeric code as sent on the wire.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Canonical name of this key.
    pub fn name(self) -> &'static str {
        // Every KeyCode was produced from the table, so the lookup succeeds.
        by_code().get(&self.0).copied().unwrap_or("unknown")
    }

    /// Whether this key lives in the virtual range.
    pub fn is_virtual(self) -> bool {
        self.0 >= VIRTUAL_KEY_BASE
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a `(from, to)` pair of key names.
///
/// An unknown name is logged together with `source` (usually the path of
/// the document it came from) and the pair is skipped.  The profile store
/// and the rule engine both go through here so they agree on what a valid
/// name is.
pub fn resolve_pair(from: &str, to: &str, source: &dyn fmt::Display) -> Option<(KeyCode, KeyCode)> {
    let Some(from_code) = KeyCode::from_name(from) else {
        warn!("unknown key_code:{} in {}", from, source);
        return None;
    };
    let Some(to_code) = KeyCode::from_name(to) else {
        warn!("unknown key_code:{} in {}", to, source);
        return None;
    };
    Some((from_code, to_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_to_hid_codes() {
        assert_eq!(KeyCode::from_name("caps_lock").map(KeyCode::raw), Some(0x39));
        assert_eq!(KeyCode::from_name("a").map(KeyCode::raw), Some(0x04));
        assert_eq!(KeyCode::from_name("f12").map(KeyCode::raw), Some(0x45));
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(KeyCode::from_name("Caps_Lock").is_none());
        assert!(KeyCode::from_name("").is_none());
    }

    #[test]
    fn raw_codes_outside_vocabulary_are_rejected() {
        assert!(KeyCode::from_raw(0).is_none());
        assert!(KeyCode::from_raw(0x1ff).is_none());
        assert!(KeyCode::from_raw(VIRTUAL_KEY_BASE).is_none());
        assert_eq!(KeyCode::from_raw(0x2a), KeyCode::from_name("delete_or_backspace"));
    }

    #[test]
    fn vocabulary_has_no_duplicates() {
        assert_eq!(by_name().len(), KEY_CODES.len());
        assert_eq!(by_code().len(), KEY_CODES.len());
    }

    #[test]
    fn virtual_keys_are_flagged() {
        let vk = KeyCode::from_name("vk_launchpad").unwrap();
        assert!(vk.is_virtual());
        assert!(!KeyCode::from_name("escape").unwrap().is_virtual());
        assert_eq!(vk.to_string(), "vk_launchpad");
    }

    #[test]
    fn resolve_pair_skips_unknown_names() {
        let src = "test.json";
        assert!(resolve_pair("caps_lock", "nope", &src).is_none());
        assert!(resolve_pair("nope", "escape", &src).is_none());
        let (from, to) = resolve_pair("caps_lock", "escape", &src).unwrap();
        assert_eq!(from.name(), "caps_lock");
        assert_eq!(to.name(), "escape");
    }
}
