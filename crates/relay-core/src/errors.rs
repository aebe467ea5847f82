use std::time::Duration;

/// Typed error hierarchy for gateway dispatch operations.
///
/// Transience is a narrow allow-list: only a connection that closed
/// abnormally or a transport-level connect timeout is worth retrying.
/// Everything else is final and triggers fallback instead.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DispatchError {
    // Transient — retry within the budget
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("connect timeout: {0}")]
    ConnectTimeout(String),

    // Final — fall back, don't retry
    #[error("remote error {status}: {body}")]
    RemoteStatus { status: u16, body: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("local execution failed: {0}")]
    LocalExecution(String),

    // Operational outcomes
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::ConnectTimeout(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionClosed(_) => "connection_closed",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::RemoteStatus { .. } => "remote_status",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Protocol(_) => "protocol",
            Self::LocalExecution(_) => "local_execution",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}
