use std::sync::Arc;

/// Represents a result type for operations in the event-report SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// SDK-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the event-report SDK.
///
/// Note that almost nothing in the pipeline is fatal: transport failures, malformed responses, and
/// local I/O problems are absorbed and logged where they occur. `Error` surfaces only from
/// lifecycle operations and from the transport boundary internally.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The reporter is not in a state that accepts this operation (e.g., `init()` called twice, or
    /// a report issued after `shutdown()`).
    #[error("reporter is {0}, operation not allowed")]
    InvalidState(&'static str),

    /// Indicates that the worker thread panicked. This should normally never happen.
    #[error("worker thread panicked")]
    WorkerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
