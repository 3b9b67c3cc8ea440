//! Pushes the selected profile to the grabber.
//!
//! This is the console user side of configuration: load the profile
//! document, then replace each of the grabber's three tables with the
//! selected profile's pairs.  [`watch_profile`] repeats that whenever the
//! document changes on disk.

use crate::ipc::client::{ClientError, GrabberClient};
use crate::profile::ProfileStore;
use crate::watcher::FileWatcher;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A [`ProfileSync`] shared between the file watcher and signal handling.
pub type SharedProfileSync = Arc<Mutex<ProfileSync>>;

/// Send clear + add for all three tables of `store`'s selected profile.
pub fn push_profile(client: &GrabberClient, store: &ProfileStore) -> Result<(), ClientError> {
    client.clear_simple_modifications()?;
    for (from, to) in store.current_simple_modifications() {
        client.add_simple_modification(from, to)?;
    }

    client.clear_fn_function_keys()?;
    for (from, to) in store.current_fn_function_keys() {
        client.add_fn_function_key(from, to)?;
    }

    client.clear_standalone_modifiers()?;
    for (from, to) in store.current_standalone_modifiers() {
        client.add_standalone_modifier(from, to)?;
    }
    Ok(())
}

/// Keeps the last good profile document and re-pushes it on reload.
pub struct ProfileSync {
    path: PathBuf,
    store: Option<ProfileStore>,
}

impl ProfileSync {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: None,
        }
    }

    pub fn shared(self) -> SharedProfileSync {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The document currently in force, if any was loaded.
    pub fn store(&self) -> Option<&ProfileStore> {
        self.store.as_ref()
    }

    /// Re-read the document and push it.
    ///
    /// A document that fails to load is skipped when an earlier one is in
    /// force, so a half-edited file does not wipe the user's rules.  On the
    /// first load the defaults are pushed instead.  Returns whether rules
    /// were pushed.
    pub fn reload(&mut self, client: &GrabberClient) -> Result<bool, ClientError> {
        let store = ProfileStore::open(&self.path);
        if self.store.is_some() && !store.is_loaded() {
            warn!("keeping previous profiles, {} did not load", self.path.display());
            return Ok(false);
        }

        push_profile(client, &store)?;
        info!("pushed profile {:?}", store.current_profile().name);
        self.store = Some(store);
        Ok(true)
    }
}

/// Reload and push `sync`'s document every time the file changes.
///
/// The watch stops when the returned watcher is dropped.
pub fn watch_profile(
    sync: SharedProfileSync,
    client: Arc<GrabberClient>,
    interval: Duration,
) -> std::io::Result<FileWatcher> {
    let path = sync.lock().path().to_path_buf();
    FileWatcher::spawn(path, interval, move || {
        let mut sync = sync.lock();
        info!("{} changed, reloading", sync.path().display());
        if let Err(e) = sync.reload(&client) {
            error!("failed to push {}: {}", sync.path().display(), e);
        }
    })
}
