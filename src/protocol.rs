//! Wire protocol between clients and the grabber daemon.
//!
//! Every datagram carries exactly one message:
//!
//! ```text
//! [operation:u8][payload]
//! ```
//!
//! Payloads are fixed-layout records of fixed-width little-endian integers
//! with no padding.  Both peers must be built from the same protocol
//! version; there is no handshake.
//!
//! | operation                            | code | payload                              | size rule |
//! |--------------------------------------|------|--------------------------------------|-----------|
//! | `connect`                            | 1    | `peer_class:u8` `pid:i32`            | exact 6   |
//! | `system_preferences_values_updated`  | 2    | `version:u32` `keyboard_fn_state:u8` | at least 6|
//! | `clear_simple_modifications`         | 3    | none                                 | any       |
//! | `add_simple_modification`            | 4    | `from:u32` `to:u32`                  | exact 9   |
//! | `clear_fn_function_keys`             | 5    | none                                 | any       |
//! | `add_fn_function_key`                | 6    | `from:u32` `to:u32`                  | exact 9   |
//! | `clear_standalone_modifiers`         | 7    | none                                 | any       |
//! | `add_standalone_modifier`            | 8    | `from:u32` `to:u32`                  | exact 9   |
//! | `set_caps_lock_led_state`            | 9    | `led_state:u8`                       | exact 2   |
//!
//! The preferences record only has a minimum size so that a newer client
//! can append fields without breaking an older daemon.

use crate::key_code::KeyCode;
use std::fmt;
use thiserror::Error;

/// Operation code carried in the first byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Connect = 1,
    SystemPreferencesValuesUpdated = 2,
    ClearSimpleModifications = 3,
    AddSimpleModification = 4,
    ClearFnFunctionKeys = 5,
    AddFnFunctionKey = 6,
    ClearStandaloneModifiers = 7,
    AddStandaloneModifier = 8,
    SetCapsLockLedState = 9,
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Operation::Connect,
            2 => Operation::SystemPreferencesValuesUpdated,
            3 => Operation::ClearSimpleModifications,
            4 => Operation::AddSimpleModification,
            5 => Operation::ClearFnFunctionKeys,
            6 => Operation::AddFnFunctionKey,
            7 => Operation::ClearStandaloneModifiers,
            8 => Operation::AddStandaloneModifier,
            9 => Operation::SetCapsLockLedState,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::SystemPreferencesValuesUpdated => "system_preferences_values_updated",
            Operation::ClearSimpleModifications => "clear_simple_modifications",
            Operation::AddSimpleModification => "add_simple_modification",
            Operation::ClearFnFunctionKeys => "clear_fn_function_keys",
            Operation::AddFnFunctionKey => "add_fn_function_key",
            Operation::ClearStandaloneModifiers => "clear_standalone_modifiers",
            Operation::AddStandaloneModifier => "add_standalone_modifier",
            Operation::SetCapsLockLedState => "set_caps_lock_led_state",
        };
        f.write_str(name)
    }
}

impl Operation {
    /// Total message size (operation byte included) and whether that size
    /// is exact or a minimum.  `None` for operations without a payload.
    pub fn size_rule(self) -> Option<SizeRule> {
        match self {
            Operation::Connect => Some(SizeRule::Exact(CONNECT_SIZE)),
            Operation::SystemPreferencesValuesUpdated => {
                Some(SizeRule::AtLeast(SYSTEM_PREFERENCES_SIZE))
            }
            Operation::AddSimpleModification
            | Operation::AddFnFunctionKey
            | Operation::AddStandaloneModifier => Some(SizeRule::Exact(KEY_PAIR_SIZE)),
            Operation::SetCapsLockLedState => Some(SizeRule::Exact(LED_STATE_SIZE)),
            Operation::ClearSimpleModifications
            | Operation::ClearFnFunctionKeys
            | Operation::ClearStandaloneModifiers => None,
        }
    }
}

/// Size constraint for a payload-bearing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    Exact(usize),
    AtLeast(usize),
}

impl SizeRule {
    fn accepts(self, len: usize) -> bool {
        match self {
            SizeRule::Exact(n) => len == n,
            SizeRule::AtLeast(n) => len >= n,
        }
    }

    fn expected(self) -> usize {
        match self {
            SizeRule::Exact(n) | SizeRule::AtLeast(n) => n,
        }
    }
}

pub const CONNECT_SIZE: usize = 1 + 1 + 4;
pub const SYSTEM_PREFERENCES_SIZE: usize = 1 + 4 + 1;
pub const KEY_PAIR_SIZE: usize = 1 + 4 + 4;
pub const LED_STATE_SIZE: usize = 1 + 1;

/// Version written into [`SystemPreferencesValues`] by this build.
pub const SYSTEM_PREFERENCES_VERSION: u32 = 1;

/// Which kind of client sent a `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PeerClass {
    /// The process that consumes remapped events.
    EventDispatcher = 1,
    /// The per-session process of the console user; owns the device grab.
    ConsoleUserServer = 2,
}

impl TryFrom<u8> for PeerClass {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PeerClass::EventDispatcher),
            2 => Ok(PeerClass::ConsoleUserServer),
            other => Err(other),
        }
    }
}

impl fmt::Display for PeerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerClass::EventDispatcher => write!(f, "event-dispatcher"),
            PeerClass::ConsoleUserServer => write!(f, "console-user-server"),
        }
    }
}

/// Caps-lock LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LedState {
    Off = 0,
    On = 1,
}

impl TryFrom<u8> for LedState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LedState::Off),
            1 => Ok(LedState::On),
            other => Err(other),
        }
    }
}

/// System preference values pushed by the console user session.
///
/// The daemon holds this record unchanged until the next push; only the
/// event-processing engine interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemPreferencesValues {
    pub version: u32,
    /// "Use F1, F2, etc. keys as standard function keys".
    pub keyboard_fn_state: bool,
}

impl Default for SystemPreferencesValues {
    fn default() -> Self {
        Self {
            version: SYSTEM_PREFERENCES_VERSION,
            keyboard_fn_state: false,
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Connect { peer_class: PeerClass, pid: i32 },
    SystemPreferencesValuesUpdated(SystemPreferencesValues),
    SetCapsLockLedState(LedState),
    ClearSimpleModifications,
    AddSimpleModification { from: KeyCode, to: KeyCode },
    ClearFnFunctionKeys,
    AddFnFunctionKey { from: KeyCode, to: KeyCode },
    ClearStandaloneModifiers,
    AddStandaloneModifier { from: KeyCode, to: KeyCode },
}

impl Message {
    pub fn operation(&self) -> Operation {
        match self {
            Message::Connect { .. } => Operation::Connect,
            Message::SystemPreferencesValuesUpdated(_) => Operation::SystemPreferencesValuesUpdated,
            Message::SetCapsLockLedState(_) => Operation::SetCapsLockLedState,
            Message::ClearSimpleModifications => Operation::ClearSimpleModifications,
            Message::AddSimpleModification { .. } => Operation::AddSimpleModification,
            Message::ClearFnFunctionKeys => Operation::ClearFnFunctionKeys,
            Message::AddFnFunctionKey { .. } => Operation::AddFnFunctionKey,
            Message::ClearStandaloneModifiers => Operation::ClearStandaloneModifiers,
            Message::AddStandaloneModifier { .. } => Operation::AddStandaloneModifier,
        }
    }

    /// Encode into a datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(KEY_PAIR_SIZE);
        buf.push(self.operation() as u8);
        match *self {
            Message::Connect { peer_class, pid } => {
                buf.push(peer_class as u8);
                buf.extend_from_slice(&pid.to_le_bytes());
            }
            Message::SystemPreferencesValuesUpdated(values) => {
                buf.extend_from_slice(&values.version.to_le_bytes());
                buf.push(values.keyboard_fn_state as u8);
            }
            Message::SetCapsLockLedState(state) => buf.push(state as u8),
            Message::AddSimpleModification { from, to }
            | Message::AddFnFunctionKey { from, to }
            | Message::AddStandaloneModifier { from, to } => {
                buf.extend_from_slice(&from.raw().to_le_bytes());
                buf.extend_from_slice(&to.raw().to_le_bytes());
            }
            Message::ClearSimpleModifications
            | Message::ClearFnFunctionKeys
            | Message::ClearStandaloneModifiers => {}
        }
        buf
    }
}

/// Reasons a datagram could not be turned into a [`Message`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty datagram")]
    Empty,

    /// Forward-compatible: callers ignore this one silently.
    #[error("unknown operation code: {0}")]
    UnknownOperation(u8),

    #[error("invalid size for {operation} ({actual}, expected {expected})")]
    InvalidSize {
        operation: Operation,
        expected: usize,
        actual: usize,
    },

    #[error("unknown peer class {0} in connect")]
    UnknownPeerClass(u8),

    #[error("invalid led state {0}")]
    InvalidLedState(u8),

    #[error("unknown key_code 0x{code:x} in {operation}")]
    UnknownKeyCode { operation: Operation, code: u32 },
}

/// Decode one datagram.
///
/// The size is checked before any field is read, so a short or oversized
/// datagram is never partially interpreted.
pub fn decode(buf: &[u8]) -> Result<Message, ProtocolError> {
    let (&op_byte, _) = buf.split_first().ok_or(ProtocolError::Empty)?;
    let operation = Operation::try_from(op_byte).map_err(ProtocolError::UnknownOperation)?;

    if let Some(rule) = operation.size_rule() {
        if !rule.accepts(buf.len()) {
            return Err(ProtocolError::InvalidSize {
                operation,
                expected: rule.expected(),
                actual: buf.len(),
            });
        }
    }

    let message = match operation {
        Operation::Connect => {
            let peer_class =
                PeerClass::try_from(buf[1]).map_err(ProtocolError::UnknownPeerClass)?;
            Message::Connect {
                peer_class,
                pid: i32::from_le_bytes(read_4(buf, 2)),
            }
        }
        Operation::SystemPreferencesValuesUpdated => {
            Message::SystemPreferencesValuesUpdated(SystemPreferencesValues {
                version: u32::from_le_bytes(read_4(buf, 1)),
                keyboard_fn_state: buf[5] != 0,
            })
        }
        Operation::SetCapsLockLedState => Message::SetCapsLockLedState(
            LedState::try_from(buf[1]).map_err(ProtocolError::InvalidLedState)?,
        ),
        Operation::ClearSimpleModifications => Message::ClearSimpleModifications,
        Operation::ClearFnFunctionKeys => Message::ClearFnFunctionKeys,
        Operation::ClearStandaloneModifiers => Message::ClearStandaloneModifiers,
        Operation::AddSimpleModification => {
            let (from, to) = decode_key_pair(operation, buf)?;
            Message::AddSimpleModification { from, to }
        }
        Operation::AddFnFunctionKey => {
            let (from, to) = decode_key_pair(operation, buf)?;
            Message::AddFnFunctionKey { from, to }
        }
        Operation::AddStandaloneModifier => {
            let (from, to) = decode_key_pair(operation, buf)?;
            Message::AddStandaloneModifier { from, to }
        }
    };
    Ok(message)
}

fn read_4(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

fn decode_key_pair(operation: Operation, buf: &[u8]) -> Result<(KeyCode, KeyCode), ProtocolError> {
    let key = |at| {
        let code = u32::from_le_bytes(read_4(buf, at));
        KeyCode::from_raw(code).ok_or(ProtocolError::UnknownKeyCode { operation, code })
    };
    Ok((key(1)?, key(5)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> KeyCode {
        KeyCode::from_name(name).unwrap()
    }

    #[test]
    fn connect_layout_is_little_endian() {
        let msg = Message::Connect {
            peer_class: PeerClass::ConsoleUserServer,
            pid: 0x0102_0304,
        };
        assert_eq!(msg.encode(), vec![1, 2, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(decode(&msg.encode()), Ok(msg));
    }

    #[test]
    fn key_pair_layout() {
        let msg = Message::AddSimpleModification {
            from: key("caps_lock"),
            to: key("delete_or_backspace"),
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), KEY_PAIR_SIZE);
        assert_eq!(bytes, vec![4, 0x39, 0, 0, 0, 0x2a, 0, 0, 0]);
    }

    #[test]
    fn every_message_decodes_to_itself() {
        let messages = [
            Message::Connect { peer_class: PeerClass::EventDispatcher, pid: 42 },
            Message::SystemPreferencesValuesUpdated(SystemPreferencesValues {
                version: 1,
                keyboard_fn_state: true,
            }),
            Message::SetCapsLockLedState(LedState::On),
            Message::ClearSimpleModifications,
            Message::AddFnFunctionKey { from: key("f1"), to: key("vk_consumer_brightness_down") },
            Message::ClearFnFunctionKeys,
            Message::ClearStandaloneModifiers,
            Message::AddStandaloneModifier { from: key("left_command"), to: key("escape") },
        ];
        for msg in messages {
            assert_eq!(decode(&msg.encode()), Ok(msg), "{}", msg.operation());
        }
    }

    #[test]
    fn short_key_pair_is_rejected() {
        let bytes = Message::AddSimpleModification { from: key("a"), to: key("b") }.encode();
        assert_eq!(
            decode(&bytes[..KEY_PAIR_SIZE - 1]),
            Err(ProtocolError::InvalidSize {
                operation: Operation::AddSimpleModification,
                expected: KEY_PAIR_SIZE,
                actual: KEY_PAIR_SIZE - 1,
            })
        );
    }

    #[test]
    fn oversized_connect_is_rejected() {
        let mut bytes = Message::Connect { peer_class: PeerClass::ConsoleUserServer, pid: 1 }.encode();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(ProtocolError::InvalidSize { .. })));
    }

    #[test]
    fn preferences_accept_trailing_fields() {
        let mut bytes = Message::SystemPreferencesValuesUpdated(SystemPreferencesValues::default()).encode();
        bytes.extend_from_slice(&[9, 9, 9]);
        assert_eq!(
            decode(&bytes),
            Ok(Message::SystemPreferencesValuesUpdated(SystemPreferencesValues::default()))
        );
        assert!(matches!(decode(&bytes[..3]), Err(ProtocolError::InvalidSize { .. })));
    }

    #[test]
    fn clear_ignores_trailing_bytes() {
        assert_eq!(decode(&[3, 0xff]), Ok(Message::ClearSimpleModifications));
    }

    #[test]
    fn unknown_operation_and_empty() {
        assert_eq!(decode(&[0xee, 1, 2]), Err(ProtocolError::UnknownOperation(0xee)));
        assert_eq!(decode(&[0]), Err(ProtocolError::UnknownOperation(0)));
        assert_eq!(decode(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn unknown_key_code_is_malformed() {
        let mut bytes = vec![Operation::AddFnFunctionKey as u8];
        bytes.extend_from_slice(&0x3au32.to_le_bytes());
        bytes.extend_from_slice(&0xdeadu32.to_le_bytes());
        assert_eq!(
            decode(&bytes),
            Err(ProtocolError::UnknownKeyCode {
                operation: Operation::AddFnFunctionKey,
                code: 0xdead
            })
        );
    }

    #[test]
    fn bad_enum_values() {
        assert_eq!(decode(&[1, 7, 0, 0, 0, 0]), Err(ProtocolError::UnknownPeerClass(7)));
        assert_eq!(decode(&[9, 2]), Err(ProtocolError::InvalidLedState(2)));
    }
}
