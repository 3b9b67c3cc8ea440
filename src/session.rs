//! [`SessionIdentity`] implementations.

use crate::traits::SessionIdentity;
use log::debug;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

/// Takes the owner of a console device node (e.g. `/dev/console`) to be
/// the console user.  Login managers hand that node to whoever is logged
/// in at the seat.
#[derive(Debug, Clone)]
pub struct ConsoleFileSession {
    path: PathBuf,
}

impl ConsoleFileSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionIdentity for ConsoleFileSession {
    fn console_user_id(&self) -> Option<u32> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Some(meta.uid()),
            Err(e) => {
                debug!("cannot stat {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

/// A fixed answer, for tests and for running without a console session.
#[derive(Debug, Clone, Copy)]
pub struct StaticSession(pub Option<u32>);

impl SessionIdentity for StaticSession {
    fn console_user_id(&self) -> Option<u32> {
        self.0
    }
}

/// Effective uid of this process.
pub fn current_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_file_owner_is_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let session = ConsoleFileSession::new(file.path());
        assert_eq!(session.console_user_id(), Some(current_uid()));
    }

    #[test]
    fn missing_console_file_means_no_user() {
        let session = ConsoleFileSession::new("/nonexistent/console");
        assert_eq!(session.console_user_id(), None);
    }

    #[test]
    fn static_session() {
        assert_eq!(StaticSession(Some(501)).console_user_id(), Some(501));
        assert_eq!(StaticSession(None).console_user_id(), None);
    }
}
