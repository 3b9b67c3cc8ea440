//! Client side of the grabber socket.
//!
//! [`GrabberClient`] marshals calls into [`Message`] datagrams.  The
//! transport is fire-and-forget: nothing is acknowledged, so a rule the
//! daemon rejects simply does not take effect.

use crate::key_code::KeyCode;
use crate::protocol::{LedState, Message, PeerClass, SystemPreferencesValues};
use crate::traits::SessionIdentity;
use log::debug;
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

/// Errors opening or using the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("grabber socket {0} is not found")]
    SocketNotFound(PathBuf),
    #[error("cannot determine the console user")]
    NoConsoleUser,
    #[error("grabber socket {path} is not owned by console user {uid}")]
    NotOwnedByConsoleUser { path: PathBuf, uid: u32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends protocol messages to a running grabber.
pub struct GrabberClient {
    socket: UnixDatagram,
    path: PathBuf,
}

impl GrabberClient {
    /// Open a client for the socket at `path`.
    ///
    /// Refuses when the socket is missing or is not owned by the console
    /// user, since the daemon hands the socket to that user only.
    pub fn open(path: impl AsRef<Path>, session: &dyn SessionIdentity) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::SocketNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let uid = session.console_user_id().ok_or(ClientError::NoConsoleUser)?;
        if meta.uid() != uid {
            return Err(ClientError::NotOwnedByConsoleUser { path, uid });
        }

        let socket = UnixDatagram::unbound()?;
        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one message.
    pub fn send(&self, message: &Message) -> Result<(), ClientError> {
        debug!("sending {:?}", message);
        self.socket.send_to(&message.encode(), &self.path)?;
        Ok(())
    }

    /// Announce this process as `peer_class`.
    pub fn connect(&self, peer_class: PeerClass) -> Result<(), ClientError> {
        self.connect_as(peer_class, std::process::id() as i32)
    }

    /// Announce `pid` as `peer_class`.
    pub fn connect_as(&self, peer_class: PeerClass, pid: i32) -> Result<(), ClientError> {
        self.send(&Message::Connect { peer_class, pid })
    }

    pub fn system_preferences_values_updated(
        &self,
        values: SystemPreferencesValues,
    ) -> Result<(), ClientError> {
        self.send(&Message::SystemPreferencesValuesUpdated(values))
    }

    pub fn set_caps_lock_led_state(&self, state: LedState) -> Result<(), ClientError> {
        self.send(&Message::SetCapsLockLedState(state))
    }

    pub fn clear_simple_modifications(&self) -> Result<(), ClientError> {
        self.send(&Message::ClearSimpleModifications)
    }

    pub fn add_simple_modification(&self, from: KeyCode, to: KeyCode) -> Result<(), ClientError> {
        self.send(&Message::AddSimpleModification { from, to })
    }

    pub fn clear_fn_function_keys(&self) -> Result<(), ClientError> {
        self.send(&Message::ClearFnFunctionKeys)
    }

    pub fn add_fn_function_key(&self, from: KeyCode, to: KeyCode) -> Result<(), ClientError> {
        self.send(&Message::AddFnFunctionKey { from, to })
    }

    pub fn clear_standalone_modifiers(&self) -> Result<(), ClientError> {
        self.send(&Message::ClearStandaloneModifiers)
    }

    pub fn add_standalone_modifier(&self, from: KeyCode, to: KeyCode) -> Result<(), ClientError> {
        self.send(&Message::AddStandaloneModifier { from, to })
    }
}
