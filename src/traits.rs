//! Collaborator traits that decouple the receiver from the operating
//! system.
//!
//! The [`Receiver`](crate::ipc::receiver::Receiver) only talks to the device
//! layer, the console session and the process table through these traits.
//! The daemon binary plugs in real implementations; tests plug in
//! recording doubles.

use crate::protocol::LedState;

/// Exclusive ownership of the raw input devices.
///
/// An implementation might seize every keyboard through the HID layer, or
/// it might be a recording stub used in tests.  Calls arrive from the
/// receiver's worker thread only, one at a time.
pub trait DeviceOwner: Send {
    /// The error type produced by this device layer.
    type Error: std::error::Error + Send + 'static;

    /// Grab every input device.  Grabbing while already grabbed must be
    /// harmless.
    fn grab_all(&mut self) -> Result<(), Self::Error>;

    /// Release every grabbed device.  Releasing while nothing is grabbed
    /// must be harmless.
    fn ungrab_all(&mut self) -> Result<(), Self::Error>;

    /// Push the caps-lock LED state to the grabbed keyboards.
    fn set_caps_lock_led_state(&mut self, state: LedState) -> Result<(), Self::Error>;
}

/// Who owns the console session right now.
pub trait SessionIdentity: Send + Sync {
    /// Numeric user id of the console user, or `None` when nobody is
    /// logged in at the console.
    fn console_user_id(&self) -> Option<u32>;
}

/// Existence check for a process id.
pub trait ProcessProbe: Send + Sync {
    /// `true` while `pid` refers to a live process.
    fn is_alive(&self, pid: i32) -> bool;
}
