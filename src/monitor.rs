//! Liveness monitor for a peer process.
//!
//! A [`ProcessMonitor`] polls one pid on a background thread and calls its
//! callback once, the first time the process is seen gone.  Dropping the
//! monitor stops the thread and waits for it; a monitor dropped before the
//! process exits never calls its callback.

use crate::traits::ProcessProbe;
use log::{debug, info};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// [`ProcessProbe`] backed by `kill(pid, 0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, pid: i32) -> bool {
        // kill() with pid <= 0 addresses process groups, not a process.
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs the permission and existence checks
        // without delivering anything.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

/// Watches one pid and fires a one-shot callback when it exits.
pub struct ProcessMonitor {
    pid: i32,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessMonitor {
    /// Start polling `pid` every `interval`.
    pub fn spawn<F>(
        pid: i32,
        interval: Duration,
        probe: Arc<dyn ProcessProbe>,
        on_exit: F,
    ) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(format!("keygrabd-monitor-{}", pid))
            .spawn(move || {
                debug!("monitoring pid {}", pid);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !probe.is_alive(pid) {
                                info!("process {} exited", pid);
                                on_exit();
                                return;
                            }
                        }
                        // Stop requested, or the monitor was dropped.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("stopped monitoring pid {}", pid);
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            pid,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// `true` once the polling thread has ended, either because the
    /// callback fired or because the monitor was stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
