use std::fmt;

/// Category of a storage error. Lets the engine decide between retrying
/// a flush and failing fast at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Permanent, fail at startup.
    Config,
    /// I/O or network error. Transient, may retry.
    Io,
    /// Data format or parse error in a record or stored row.
    Format,
    /// The backend did not answer within the allotted time.
    Timeout,
    /// Logical error (constraint violation, invalid state, generic).
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Error returned by every data-access operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    kind: ErrorKind,
    message: String,
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Timeout, message: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Add context to the error, keeping its ErrorKind.
    ///
    /// Produces: `"context: message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StorageError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → StorageError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = StorageError::timeout("write_batch").with_context("instance");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), "instance: write_batch");
        assert_eq!(err.to_string(), "timeout: instance: write_batch");
    }

    #[test]
    fn io_errors_map_to_io_kind() {
        let err: StorageError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
