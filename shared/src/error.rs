//! Errors raised by the pure progression functions.

/// Malformed input to a pure function.
///
/// These are never clamped away: callers get the error back and must
/// decide what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressionError {
    InvalidArgument(String),
}

impl ProgressionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl std::fmt::Display for ProgressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for ProgressionError {}
