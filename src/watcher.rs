//! Change watcher for the profile document.
//!
//! A [`FileWatcher`] polls one path on a background thread and calls its
//! callback every time the file's modification time or length changes,
//! including when it appears or disappears.  Dropping the watcher stops
//! the thread and waits for it.

use log::debug;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// What the watcher compares between polls; `None` while the file is
/// missing.
type Stamp = Option<(SystemTime, u64)>;

fn stamp(path: &Path) -> Stamp {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Watches one path and fires a callback on every change.
pub struct FileWatcher {
    path: PathBuf,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start polling `path` every `interval`.
    ///
    /// The file's current state is taken as the baseline before this
    /// returns, so only later changes fire `on_change`.
    pub fn spawn<F>(
        path: impl Into<PathBuf>,
        interval: Duration,
        mut on_change: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let path = path.into();
        let mut last = stamp(&path);
        let watched = path.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("keygrabd-watcher".into())
            .spawn(move || {
                debug!("watching {}", watched.display());
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let current = stamp(&watched);
                            if current != last {
                                debug!("{} changed", watched.display());
                                last = current;
                                on_change();
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("stopped watching {}", watched.display());
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            path,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
