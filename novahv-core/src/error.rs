//! Error taxonomy for the VM service layer.

use thiserror::Error;

/// Errors surfaced by every `novahv-core` operation.
///
/// Each variant carries enough context for a single-line, user-facing
/// notification (via `Display`) plus a variant-level match for programmatic
/// handling. See spec §7 for the taxonomy this mirrors.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection open/probe/close failure. Never fatal: the connection pool
    /// records it per-URI instead of propagating.
    #[error("connection to '{uri}' failed: {message}")]
    Connection { uri: String, message: String },

    /// A VM, pool, volume, or network is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation requires a precondition the caller didn't meet (VM
    /// stopped, volume not in use, free space available, ...).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Malformed XML, invalid parameter, invalid IP range, etc.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Name clash on destination, subnet overlap.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A hypervisor call or SSH step exceeded its budget.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A subprocess (websockify, ssh) was missing, exited non-zero, or died.
    #[error("external process '{program}' failed: {message}")]
    ExternalProcess { program: String, message: String },

    /// The persistent change succeeded but the live update did not; the
    /// change will take effect after the next boot.
    #[error("applied persistently but live update failed: {0}")]
    PartialSuccess(String),

    /// The worker executing this operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for the underlying hypervisor library surfacing something
    /// that doesn't fit the taxonomy above, with cause chaining preserved.
    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] VirtError),
}

impl Error {
    pub fn connection(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection { uri: uri.into(), message: message.into() }
    }

    pub fn external_process(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalProcess { program: program.into(), message: message.into() }
    }

    /// Whether a caller should treat this as "skip this URI" rather than a
    /// hard failure — connection errors are recorded, never raised fatally.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }
}

/// Opaque wrapper around whatever the underlying hypervisor binding's error
/// type is, so `Error` has a single cause-chaining variant regardless of
/// which backend (libvirt, mock) produced it.
#[derive(Debug)]
pub struct VirtError(pub String);

impl std::fmt::Display for VirtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for VirtError {}

#[cfg(feature = "libvirt")]
impl From<virt::error::Error> for Error {
    fn from(e: virt::error::Error) -> Self {
        Error::Hypervisor(VirtError(e.to_string()))
    }
}

/// Result type alias used throughout `novahv-core`.
pub type Result<T> = std::result::Result<T, Error>;
