//! RPC status values passed to the finish verbs.

use std::fmt;

/// Canonical RPC status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Not an error.
    Ok,
    /// The operation was cancelled, typically by the caller.
    Cancelled,
    /// Unknown error.
    Unknown,
    /// The client specified an invalid argument.
    InvalidArgument,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded,
    /// A requested entity was not found.
    NotFound,
    /// The entity that a client attempted to create already exists.
    AlreadyExists,
    /// The caller does not have permission to execute the operation.
    PermissionDenied,
    /// Some resource has been exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// The operation is not implemented.
    Unimplemented,
    /// Internal error.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// The request does not have valid authentication credentials.
    Unauthenticated,
}

/// An RPC status: a [`StatusCode`] plus an optional developer-facing
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    /// The `Ok` status with no message.
    #[inline]
    pub fn ok() -> Self {
        Status {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    /// Create a status with the given code and message.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// The status code.
    #[inline]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// The developer-facing message. Empty for [`Status::ok`].
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the code is [`StatusCode::Ok`].
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status() {
        let status = Status::ok();
        assert!(status.is_ok());
        assert_eq!(status.code(), StatusCode::Ok);
        assert_eq!(status.message(), "");
    }

    #[test]
    fn display_includes_message() {
        let status = Status::new(StatusCode::NotFound, "no such method");
        assert!(!status.is_ok());
        assert_eq!(status.to_string(), "NotFound: no such method");
    }
}
