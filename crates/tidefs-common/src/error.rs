//! Error types for TideFS
//!
//! One taxonomy shared by every crate in the workspace. Engine completion
//! codes are negative errno values and pass through unmodified; the only
//! translation performed anywhere is distinguishing "not found" (so callers
//! can fall back to the POSIX namespace) from all other failures.

use thiserror::Error;

/// Common result type for TideFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for TideFS
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted before the engine finished loading, or the
    /// readiness wait timed out.
    #[error("engine not ready")]
    EngineNotReady,

    /// The reactor is draining or stopped; no new calls are accepted.
    #[error("engine shutting down")]
    ShuttingDown,

    /// The engine has no file with this name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-zero engine completion code, passed through verbatim.
    #[error("engine {op} failed: completion code {code}")]
    Engine { op: &'static str, code: i32 },

    /// POSIX-fallback I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an error from an engine completion code.
    ///
    /// `-ENOENT` becomes [`Error::NotFound`] carrying `name`; every other
    /// non-zero code is surfaced verbatim as [`Error::Engine`].
    pub fn from_completion(op: &'static str, code: i32, name: &str) -> Self {
        if code == -libc::ENOENT {
            Self::NotFound(name.to_string())
        } else {
            Self::Engine { op, code }
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error (triggers POSIX fallback)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this error means the reactor is going away
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_completion_maps_enoent() {
        let err = Error::from_completion("open", -libc::ENOENT, "MANIFEST-000001");
        assert!(err.is_not_found());
        assert!(matches!(err, Error::NotFound(name) if name == "MANIFEST-000001"));
    }

    #[test]
    fn test_from_completion_passes_other_codes() {
        let err = Error::from_completion("read", -libc::EIO, "000004.sst");
        match err {
            Error::Engine { op, code } => {
                assert_eq!(op, "read");
                assert_eq!(code, -libc::EIO);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_io_not_found() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!err.is_shutdown());
    }

    #[test]
    fn test_shutdown() {
        assert!(Error::ShuttingDown.is_shutdown());
        assert!(!Error::EngineNotReady.is_shutdown());
    }
}
