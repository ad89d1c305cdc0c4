//! Error types for the Luau bridge

use crate::value::ValueKind;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
///
/// Errors fall into two classes. Usage errors are contract violations by the
/// host (touching a disposed object, mixing states, re-entering a running
/// state) and are reported before any native call is made. Script errors come
/// out of the VM itself: compile failures, runtime errors, allocation failures
/// and cancellation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A state or handle was used after disposal
    #[error("cannot access a disposed {0}")]
    Disposed(&'static str),

    /// A handle was pushed onto a state other than the one that owns it
    #[error("cannot push a {0} owned by a different state")]
    CrossState(&'static str),

    /// A state was resumed while a previous resume is still in flight
    #[error("state is already running")]
    AlreadyRunning,

    /// The main state was resumed as if it were a coroutine
    #[error("attempt to yield from outside a coroutine")]
    NotACoroutine,

    /// A result destination cannot hold every returned value
    #[error("destination is too short: {needed} results, room for {capacity}")]
    DestinationTooShort {
        /// Number of values produced
        needed: usize,
        /// Length of the destination
        capacity: usize,
    },

    /// A value could not be read as the requested host type
    #[error("cannot convert {from} to {to}")]
    Conversion {
        /// Kind of the source value
        from: ValueKind,
        /// Requested host type
        to: &'static str,
    },

    /// Invalid argument passed to a bridge operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Script failed to compile or load
    #[error("{0}")]
    Syntax(String),

    /// Script raised an error while running
    #[error("{0}")]
    Runtime(String),

    /// Allocation failure or an oversized artifact
    #[error("{0}")]
    Resource(String),

    /// A pending host operation observed cancellation
    #[error("operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Build a runtime error from any displayable message.
    pub fn runtime(message: impl std::fmt::Display) -> Self {
        Error::Runtime(message.to_string())
    }

    /// True for contract violations detected on the host side.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::Disposed(_)
                | Error::CrossState(_)
                | Error::AlreadyRunning
                | Error::NotACoroutine
                | Error::DestinationTooShort { .. }
                | Error::Conversion { .. }
                | Error::InvalidArgument(_)
        )
    }

    /// True for errors produced by the VM or by host callbacks it invoked.
    pub fn is_script_error(&self) -> bool {
        !self.is_usage_error()
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Runtime(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Runtime(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Disposed("table").is_usage_error());
        assert!(Error::AlreadyRunning.is_usage_error());
        assert!(Error::Runtime("boom".into()).is_script_error());
        assert!(Error::Cancelled.is_script_error());
        assert!(Error::Resource("out of memory".into()).is_script_error());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::NotACoroutine.to_string(),
            "attempt to yield from outside a coroutine"
        );
        assert_eq!(
            Error::DestinationTooShort { needed: 3, capacity: 1 }.to_string(),
            "destination is too short: 3 results, room for 1"
        );
        assert_eq!(
            Error::Conversion { from: ValueKind::String, to: "f64" }.to_string(),
            "cannot convert string to f64"
        );
    }
}
