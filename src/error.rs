//! Error types for the ingestion side of the worker.
//!
//! Task failures live in [`crate::commands::TaskError`] because they are
//! reported to the peer as error frames instead of being handled here.

use thiserror::Error;

/// Shared result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Failures raised while reading and decoding the request stream.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The line could not be decoded into a request. The line is dropped.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The line exceeded the configured maximum length. The line is dropped.
    #[error("line too long: exceeded {0} bytes")]
    LineTooLong(usize),

    /// The input or output stream failed.
    #[error("stream failure: {0}")]
    Stream(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: WorkerError = io.into();
        assert_eq!(err.to_string(), "stream failure: closed");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            WorkerError::LineTooLong(1024).to_string(),
            "line too long: exceeded 1024 bytes"
        );
    }
}
