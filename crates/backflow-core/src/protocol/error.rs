//! Error and completion types for data-flow streams.

use thiserror::Error;

/// Error type for data-flow operations.
///
/// Cloneable so terminal signals can be buffered by subjects and compared
/// in tests. I/O errors are captured as messages because [`std::io::Error`]
/// is not `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// A byte resource could not be opened (invalid location or handle).
    #[error("could not open resource: {0}")]
    OpenFailed(String),

    /// The underlying resource failed mid-stream.
    #[error("i/o failure: {0}")]
    Io(String),

    /// A write destination has no remaining capacity.
    #[error("destination has no remaining capacity")]
    NoCapacity,

    /// A domain-specific failure raised by a source or consumer.
    #[error("{0}")]
    Custom(String),
}

impl FlowError {
    /// Shorthand for a [`FlowError::Custom`] failure.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The terminal signal of a stream, delivered at most once per consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The stream ended normally.
    Finished,
    /// The stream ended with a failure.
    Failed(FlowError),
}

impl Completion {
    /// Returns `true` for a normal end of stream.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&FlowError> {
        match self {
            Self::Finished => None,
            Self::Failed(err) => Some(err),
        }
    }
}
