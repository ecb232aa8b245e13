use thiserror::Error;

/// Errors surfaced by the storage layer.
///
/// Only foreground operations (startup, connect, init, export, explicit mode
/// switches) ever hand these to a caller. Background propagation and poll
/// fetches log them and move on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// No backend URL or mode configured for the requested action.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, timeout, or unreadable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-2xx status.
    #[error("API Error: {status}")]
    Http { status: u16 },

    /// Backend answered `{success: false, error}`.
    #[error("remote error: {0}")]
    Remote(String),

    /// Update/delete target id does not exist on the backend.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The durable local mirror could not be opened or written.
    #[error("local mirror error: {0}")]
    Mirror(String),
}

impl SyncError {
    /// Classify a `{success: false, error}` message from the script endpoint.
    pub fn from_remote_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match message.strip_prefix("Record not found: ") {
            Some(id) => SyncError::NotFound(id.to_string()),
            None => SyncError::Remote(message),
        }
    }

    /// True for network-level failures (including non-2xx statuses).
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Http { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_classification() {
        assert_eq!(
            SyncError::from_remote_message("Record not found: abc123"),
            SyncError::NotFound("abc123".to_string())
        );
        assert_eq!(
            SyncError::from_remote_message("Sheet not found: shifts"),
            SyncError::Remote("Sheet not found: shifts".to_string())
        );
    }

    #[test]
    fn test_http_error_message_carries_status() {
        let err = SyncError::Http { status: 503 };
        assert_eq!(err.to_string(), "API Error: 503");
        assert!(err.is_transport());
        assert!(!SyncError::Remote("x".into()).is_transport());
    }
}
