//! Console user side of keygrabd.
//!
//! Connects to the grabber as the console user server, which makes the
//! daemon grab the devices and watch this process, then pushes the
//! selected profile.  The profile document is pushed again whenever it
//! changes on disk or SIGHUP arrives; SIGINT or SIGTERM exits, and the
//! daemon releases the devices once it notices.
//!
//! Run with:
//!     keygrab-session [--config <daemon.json>] [--profile <keygrabd.json>]

use keygrabd::config::{config_dir, ensure_private_dir, Config};
use keygrabd::ipc::client::GrabberClient;
use keygrabd::profile::default_profile_path;
use keygrabd::protocol::PeerClass;
use keygrabd::session::ConsoleFileSession;
use keygrabd::session_sync::{watch_profile, ProfileSync};
use log::{error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::Arc;

/// Value following `flag` on the command line.
fn arg_value(flag: &str) -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn main() {
    env_logger::init();

    let config = Config::load_or_default(arg_value("--config").as_deref());
    let profile_path = arg_value("--profile").unwrap_or_else(default_profile_path);
    let dir = config_dir();
    if let Err(e) = ensure_private_dir(&dir) {
        warn!("cannot create {}: {}", dir.display(), e);
    }

    let session = ConsoleFileSession::new(config.console_device.clone());
    let client = match GrabberClient::open(&config.socket_path, &session) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("cannot open grabber client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = client.connect(PeerClass::ConsoleUserServer) {
        error!("connect failed: {}", e);
        std::process::exit(1);
    }

    let mut sync = ProfileSync::new(profile_path);
    if let Err(e) = sync.reload(&client) {
        error!("failed to push {}: {}", sync.path().display(), e);
    }
    let sync = sync.shared();

    let _watcher = match watch_profile(sync.clone(), client.clone(), config.profile_watch_interval()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("cannot watch the profile document, reload with SIGHUP: {}", e);
            None
        }
    };

    let mut signals = match Signals::new([SIGHUP, SIGINT, SIGTERM]) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install signal handlers: {}", e);
            std::process::exit(1);
        }
    };

    info!("keygrab-session running");
    for signal in signals.forever() {
        match signal {
            SIGHUP => {
                let mut sync = sync.lock();
                info!("reloading {}", sync.path().display());
                if let Err(e) = sync.reload(&client) {
                    error!("failed to push {}: {}", sync.path().display(), e);
                }
            }
            _ => {
                info!("received signal {}, exiting", signal);
                break;
            }
        }
    }
}
