//! Result and error types shared by every coordination component.

use std::fmt;

use thiserror::Error;

/// A successful reply from a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T> {
    /// Backend request identifier, for correlating with server logs.
    pub request_id: String,
    /// Decoded payload.
    pub data: T,
}

impl<T> Response<T> {
    /// Wrap a payload with its request id.
    #[must_use]
    pub fn new(request_id: impl Into<String>, data: T) -> Self {
        Self {
            request_id: request_id.into(),
            data,
        }
    }

    /// Map the payload, keeping the request id.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            request_id: self.request_id,
            data: f(self.data),
        }
    }
}

/// Error returned by a remote collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The backend received the call and declined it.
    #[error("{message}")]
    Rejected {
        request_id: String,
        code: Option<String>,
        message: String,
    },
    /// The call never produced a backend answer.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Build a rejection without an error code.
    #[must_use]
    pub fn rejected(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            request_id: request_id.into(),
            code: None,
            message: message.into(),
        }
    }

    /// Request id of the rejected call, empty for transport failures.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Rejected { request_id, .. } => request_id,
            Self::Transport(_) => "",
        }
    }

    /// Whether the backend reported the target resource as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Rejected { code, message, .. } => {
                code.as_deref()
                    .is_some_and(|c| c.to_ascii_lowercase().contains("notfound"))
                    || message.to_ascii_lowercase().contains("not found")
            }
            Self::Transport(_) => false,
        }
    }
}

/// One failed unit inside a multi-entity operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// What failed (a context path, a chunk label).
    pub target: String,
    /// Backend or local message.
    pub message: String,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

/// Failure half of an [`OperationResult`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("{0}")]
    Remote(String),
    #[error("Timed out after {waited_ms}ms waiting for {waiting_for}")]
    TimedOut { waiting_for: String, waited_ms: u128 },
    #[error("{} of {total} units failed: {}", .failures.len(), join_failures(.failures))]
    PartialFailure {
        total: usize,
        failures: Vec<UnitFailure>,
    },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Chunk {index} at offset {offset} failed: {message}")]
    Chunk {
        index: usize,
        offset: u64,
        message: String,
    },
}

fn join_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<RemoteError> for OperationError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err.to_string())
    }
}

/// Outcome of a public coordination operation.
///
/// Remote rejections, timeouts and partial failures all land here rather
/// than unwinding to the caller; inspect [`OperationResult::success`]
/// before trusting the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult<T> {
    /// Request id of the call that decided the outcome, possibly empty.
    pub request_id: String,
    /// Payload or failure.
    pub outcome: Result<T, OperationError>,
}

impl<T> OperationResult<T> {
    /// Successful result.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, data: T) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Ok(data),
        }
    }

    /// Failed result.
    #[must_use]
    pub fn fail(request_id: impl Into<String>, error: OperationError) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Err(error),
        }
    }

    /// Failed result built from a collaborator error.
    #[must_use]
    pub fn from_remote(err: RemoteError) -> Self {
        Self::fail(err.request_id().to_string(), err.into())
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Failure message, empty on success.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.outcome
            .as_ref()
            .err()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&OperationError> {
        self.outcome.as_ref().err()
    }

    /// Consume into the underlying `Result`.
    ///
    /// # Errors
    /// Returns the operation error when the result is a failure.
    pub fn into_result(self) -> Result<T, OperationError> {
        self.outcome
    }

    /// Map the payload, keeping the request id.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            request_id: self.request_id,
            outcome: self.outcome.map(f),
        }
    }
}

impl<T> From<Result<Response<T>, RemoteError>> for OperationResult<T> {
    fn from(res: Result<Response<T>, RemoteError>) -> Self {
        match res {
            Ok(resp) => Self::ok(resp.request_id, resp.data),
            Err(err) => Self::from_remote(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_prefix() {
        let err = OperationError::TimedOut {
            waiting_for: "session s-1 to reach RUNNING".into(),
            waited_ms: 2000,
        };
        assert!(err.to_string().starts_with("Timed out"));
    }

    #[test]
    fn test_partial_failure_names_targets() {
        let err = OperationError::PartialFailure {
            total: 3,
            failures: vec![UnitFailure {
                target: "/tmp/data".into(),
                message: "quota exceeded".into(),
            }],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("1 of 3 units failed"));
        assert!(msg.contains("/tmp/data: quota exceeded"));
    }

    #[test]
    fn test_remote_rejection_keeps_request_id() {
        let res: OperationResult<()> =
            Err(RemoteError::rejected("req-9", "InvalidApiKey")).into();
        assert!(!res.success());
        assert_eq!(res.request_id, "req-9");
        assert_eq!(res.error_message(), "InvalidApiKey");
    }

    #[test]
    fn test_not_found_detection() {
        assert!(RemoteError::rejected("r", "Session not found").is_not_found());
        let coded = RemoteError::Rejected {
            request_id: "r".into(),
            code: Some("InvalidSession.NotFound".into()),
            message: "gone".into(),
        };
        assert!(coded.is_not_found());
        assert!(!RemoteError::Transport("reset".into()).is_not_found());
    }
}
