//! Error types for offload operations
//!
//! Every runtime failure in this crate means the same thing to the caller:
//! the request was not completed by the accelerator and must be redone in
//! software. The variants exist for telemetry and diagnosis.

/// Result type for offload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status code reported for a completed offload
pub const STATUS_SUCCESS: i32 = 0;

/// Offload errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No contiguous DMA region could satisfy the request
    #[error("Failed to allocate {requested_bytes} contiguous bytes: {reason}")]
    AllocationFailure {
        /// Bytes requested
        requested_bytes: usize,
        /// Failure reason
        reason: String,
    },

    /// Instance pool not initialized or acceleration administratively off
    #[error("Accelerator unavailable: {0}")]
    EngineUnavailable(String),

    /// No completion from the device within the timeout
    #[error("Job timed out after {timeout_ms}ms")]
    JobTimeout {
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// The device reported an explicit failure
    #[error("Job failed: {0}")]
    JobError(String),

    /// The device refused the submission because its rings are full
    #[error("Accelerator busy")]
    Busy,

    /// Decryption digest did not match; output must be discarded
    #[error("Authentication failed: digest mismatch")]
    AuthenticationFailure,

    /// Caller violated a precondition (empty buffer, bad key length, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error should be handled by redoing the request in software
    #[must_use]
    pub fn should_fallback(&self) -> bool {
        !matches!(
            self,
            Error::InvalidInput(_) | Error::InvalidConfig(_) | Error::Io(_)
        )
    }

    /// Non-zero status code for this error
    #[must_use]
    pub fn status_code(&self) -> i32 {
        match self {
            Error::AllocationFailure { .. } => 1,
            Error::EngineUnavailable(_) => 2,
            Error::JobTimeout { .. } => 3,
            Error::JobError(_) => 4,
            Error::Busy => 5,
            Error::AuthenticationFailure => 6,
            Error::InvalidInput(_) => 22,
            Error::InvalidConfig(_) => 23,
            Error::Io(_) => 24,
        }
    }

    /// Create an allocation failure
    #[must_use]
    pub fn alloc_failed(requested_bytes: usize, reason: impl Into<String>) -> Self {
        Error::AllocationFailure {
            requested_bytes,
            reason: reason.into(),
        }
    }

    /// Create an unavailable-engine error
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Error::EngineUnavailable(reason.into())
    }

    /// Create a job error
    #[must_use]
    pub fn job(message: impl Into<String>) -> Self {
        Error::JobError(message.into())
    }
}

/// Map a result to the integer status seen by C-style callers
#[must_use]
pub fn status_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => STATUS_SUCCESS,
        Err(e) => e.status_code(),
    }
}

/// Error severity for metrics and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Redone in software, nothing else to do
    Recoverable,
    /// Caller bug or bad configuration
    Critical,
}

impl Error {
    /// Get the severity of this error
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        if self.should_fallback() {
            ErrorSeverity::Recoverable
        } else {
            ErrorSeverity::Critical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::alloc_failed(65536, "pool exhausted");
        assert!(err.to_string().contains("65536"));
        assert!(err.to_string().contains("pool exhausted"));
        assert!(Error::JobTimeout { timeout_ms: 500 }
            .to_string()
            .contains("500ms"));
    }

    #[test]
    fn test_should_fallback() {
        assert!(Error::JobTimeout { timeout_ms: 500 }.should_fallback());
        assert!(Error::AuthenticationFailure.should_fallback());
        assert!(Error::Busy.should_fallback());
        assert!(Error::unavailable("disabled").should_fallback());
        assert!(!Error::InvalidInput("empty".into()).should_fallback());
    }

    #[test]
    fn test_status_codes_are_nonzero() {
        let errors = [
            Error::alloc_failed(1, "x"),
            Error::unavailable("x"),
            Error::JobTimeout { timeout_ms: 1 },
            Error::job("x"),
            Error::Busy,
            Error::AuthenticationFailure,
            Error::InvalidInput("x".into()),
        ];
        for e in &errors {
            assert_ne!(e.status_code(), STATUS_SUCCESS);
        }
        assert_eq!(status_of(&Ok::<_, Error>(3usize)), STATUS_SUCCESS);
        assert_eq!(status_of::<()>(&Err(Error::Busy)), 5);
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(Error::Busy.severity(), ErrorSeverity::Recoverable);
        assert_eq!(
            Error::InvalidConfig("min > max".into()).severity(),
            ErrorSeverity::Critical
        );
    }
}
