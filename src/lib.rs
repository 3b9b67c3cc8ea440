//! **keygrabd**: the privileged core of a keyboard remapping daemon.
//!
//! The daemon grabs the raw input devices on behalf of the console user,
//! holds the remap rules that event processing consults, and takes its
//! orders from unprivileged clients over a local datagram socket.
//!
//! # Architecture
//!
//! * [`protocol`] defines the fixed binary messages; [`ipc::client`] sends
//!   them and [`ipc::receiver`] decodes and dispatches them on a single
//!   worker thread.
//! * [`traits::DeviceOwner`] abstracts the device grab so the receiver is
//!   not coupled to any HID backend; [`traits::SessionIdentity`] and
//!   [`traits::ProcessProbe`] abstract the console session and the process
//!   table.
//! * [`monitor`] watches the console user server's pid and releases the
//!   devices when it dies without saying goodbye.
//! * [`manipulator`] holds the three rule tables; [`profile`] loads them
//!   from the user's JSON document and [`session_sync`] pushes them from
//!   the session side, again whenever [`watcher`] sees the file change.

pub mod config;
pub mod device;
pub mod ipc;
pub mod key_code;
pub mod manipulator;
pub mod monitor;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod session_sync;
pub mod traits;
pub mod watcher;
