//! Request status and network error codes.

/// Error codes a handler can report on a response, and that the request layer
/// reports when a request does not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    #[error("request aborted")]
    Aborted,
    #[error("request failed")]
    Failed,
    #[error("file not found")]
    FileNotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid url")]
    InvalidUrl,
    #[error("unknown url scheme")]
    UnknownUrlScheme,
    #[error("connection failed")]
    ConnectionFailed,
    #[error("operation pending")]
    IoPending,
}

impl NetError {
    /// Maps the error code onto the status the request layer observes.
    pub fn status(self) -> RequestStatus {
        match self {
            NetError::Aborted => RequestStatus::Canceled,
            NetError::IoPending => RequestStatus::IoPending,
            other => RequestStatus::Failed(other),
        }
    }
}

/// Status of a job as seen by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    Success,
    IoPending,
    Canceled,
    Failed(NetError),
}

impl RequestStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestStatus::Success)
    }

    pub fn is_io_pending(&self) -> bool {
        matches!(self, RequestStatus::IoPending)
    }

    /// True for statuses that end a request without a body.
    pub fn is_terminal_error(&self) -> bool {
        matches!(self, RequestStatus::Canceled | RequestStatus::Failed(_))
    }
}
