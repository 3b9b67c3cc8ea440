//! Entry point for the **keygrabd** daemon.
//!
//! Binds the grabber socket, seeds the rule tables from a profile document
//! when one is configured, and runs until SIGINT or SIGTERM.  On the way
//! out the receiver releases every device and clears every table.

use keygrabd::config::Config;
use keygrabd::device::GrabState;
use keygrabd::ipc::receiver::Receiver;
use keygrabd::manipulator::EventManipulator;
use keygrabd::monitor::SystemProcessProbe;
use keygrabd::profile::ProfileStore;
use keygrabd::session::ConsoleFileSession;
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::Arc;

/// Value of `--config <path>`, if given.
fn config_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn main() {
    env_logger::init();

    let config = Config::load_or_default(config_arg().as_deref());

    let mut manipulator = EventManipulator::new();
    if let Some(path) = &config.profile_path {
        manipulator.load_profile(&ProfileStore::open(path));
    }

    let session = ConsoleFileSession::new(config.console_device.clone());
    let receiver = match Receiver::start(
        &config,
        GrabState::new(),
        manipulator.shared(),
        &session,
        Arc::new(SystemProcessProbe),
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to start receiver: {}", e);
            std::process::exit(1);
        }
    };

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install signal handlers: {}", e);
            receiver.shutdown();
            std::process::exit(1);
        }
    };

    info!("keygrabd running");
    if let Some(signal) = signals.forever().next() {
        info!("received signal {}, shutting down", signal);
    }
    receiver.shutdown();
}
