use std::time::Duration;

use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors that can occur while planning, reading or transferring an upload
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Read out of range: offset {offset} + length {length} exceeds source size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Storage backend error during {operation}: {source}")]
    Backend {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Upload timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl UploadError {
    /// Create an invalid argument error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Wrap a local I/O failure with what was being attempted
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a backend error from any error type
    pub fn backend<S, E>(operation: S, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            operation: operation.into(),
            source: Box::new(error),
        }
    }

    /// Create a backend error from a plain rejection message
    pub fn backend_message<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        let message: String = message.into();
        Self::Backend {
            operation: operation.into(),
            source: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if re-running the whole upload could succeed.
    ///
    /// Local input problems (bad arguments, unreadable files, ranges past the
    /// end of the source) will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Timeout { .. } | Self::ProtocolViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_are_retryable_local_errors_are_not() {
        assert!(UploadError::backend_message("upload_part", "connection reset").is_retryable());
        assert!(UploadError::Timeout { timeout: Duration::from_secs(1) }.is_retryable());
        assert!(!UploadError::invalid("part size").is_retryable());
        assert!(!UploadError::io("opening file", std::io::Error::from(std::io::ErrorKind::NotFound)).is_retryable());
        assert!(!UploadError::OutOfRange { offset: 10, length: 5, size: 12 }.is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        let err = UploadError::backend_message("complete_multipart_upload", "NoSuchUpload");
        assert_eq!(
            err.to_string(),
            "Storage backend error during complete_multipart_upload: NoSuchUpload"
        );

        let err = UploadError::io("reading part 3", std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(err.to_string().starts_with("I/O error while reading part 3"));
    }
}
