//! [`DeviceOwner`] used by the daemon binary.
//!
//! The HID seize itself lives outside this crate.  [`GrabState`] tracks
//! what the receiver asked for and logs each transition, so the daemon can
//! run, and be observed, without a device backend attached.

use crate::protocol::LedState;
use crate::traits::DeviceOwner;
use log::info;
use std::convert::Infallible;

#[derive(Debug, Default)]
pub struct GrabState {
    grabbed: bool,
    caps_lock: Option<LedState>,
}

impl GrabState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn caps_lock_led_state(&self) -> Option<LedState> {
        self.caps_lock
    }
}

impl DeviceOwner for GrabState {
    type Error = Infallible;

    fn grab_all(&mut self) -> Result<(), Infallible> {
        if !self.grabbed {
            info!("grabbing devices");
        }
        self.grabbed = true;
        Ok(())
    }

    fn ungrab_all(&mut self) -> Result<(), Infallible> {
        if self.grabbed {
            info!("ungrabbing devices");
        }
        self.grabbed = false;
        Ok(())
    }

    fn set_caps_lock_led_state(&mut self, state: LedState) -> Result<(), Infallible> {
        info!("caps lock led {:?}", state);
        self.caps_lock = Some(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_and_ungrab_are_idempotent() {
        let mut state = GrabState::new();
        state.grab_all().unwrap();
        state.grab_all().unwrap();
        assert!(state.is_grabbed());
        state.ungrab_all().unwrap();
        state.ungrab_all().unwrap();
        assert!(!state.is_grabbed());
    }

    #[test]
    fn led_state_is_remembered() {
        let mut state = GrabState::new();
        assert_eq!(state.caps_lock_led_state(), None);
        state.set_caps_lock_led_state(LedState::On).unwrap();
        assert_eq!(state.caps_lock_led_state(), Some(LedState::On));
    }
}
