//! The local datagram socket between the grabber and its clients.
//!
//! The console user server and the event dispatcher send binary
//! [`protocol`](crate::protocol) messages to the grabber's socket; the
//! grabber never answers.

pub mod client;
pub mod receiver;
