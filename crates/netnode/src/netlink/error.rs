//! Error types for netlink operations.

use std::io;

/// Result type for netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the kernel over netlink.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel rejected the request.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// Positive errno value.
        errno: i32,
        /// strerror text, followed by the extended-ACK message if any.
        message: String,
    },

    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
}

impl Error {
    /// Build a kernel error from the negative errno carried in NLMSG_ERROR.
    pub fn from_errno(errno: i32) -> Self {
        let errno = errno.saturating_abs();
        Self::Kernel {
            errno,
            message: io::Error::from_raw_os_error(errno).to_string(),
        }
    }

    /// Append the kernel's extended-ACK text to a kernel error.
    pub fn with_ext_ack(self, ext: &str) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::Kernel {
                errno,
                message: format!("{message}: {ext}"),
            },
            other => other,
        }
    }

    /// errno of a kernel error (or of an I/O error carrying one).
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// ENOENT or ENODEV.
    pub fn is_not_found(&self) -> bool {
        matches!(self.errno(), Some(libc::ENOENT) | Some(libc::ENODEV))
    }

    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    /// EPERM or EACCES.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.errno(), Some(libc::EPERM) | Some(libc::EACCES))
    }
}
