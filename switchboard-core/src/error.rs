//! Error types for Switchboard operations.

use thiserror::Error;

/// Validation errors, raised at construction boundaries before data
/// reaches a store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Remote publication errors, classified so the queue can decide what is
/// benign and what is worth an error log. Classification never blocks the
/// local mutation that triggered the publish.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The entity is already absent remotely; treated as success.
    #[error("Remote entity not found: {kind} {key}")]
    EntityNotFound { kind: String, key: String },

    /// The remote store pushed back; the task is dropped and the next
    /// coalesced update catches up.
    #[error("Remote store rate limited: {reason}")]
    RateLimited { reason: String },

    #[error("Remote operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Remote store error: {reason}")]
    Other { reason: String },
}

/// Completion loop errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoopError {
    /// `run()` was called while a run is in flight. Runs are rejected, not
    /// queued; callers retry off the completion-requested signal.
    #[error("A completion run is already in progress")]
    AlreadyRunning,

    #[error("Completion provider connection failed: {reason}")]
    ProviderConnection { reason: String },
}

/// Failure of one tool invocation, surfaced through the loop's tool-error
/// event; the dispatcher decides whether the run continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Tool {function} failed: {reason}")]
pub struct ToolExecutionError {
    pub function: String,
    pub reason: String,
}

/// Speech relay control errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// An inbound control payload failed to parse. The triggering request
    /// fails with an explicit error; the session is not torn down.
    #[error("Malformed control payload in {field}: {reason}")]
    MalformedControlPayload { field: String, reason: String },

    /// The duplex channel to the caller is gone.
    #[error("Relay channel closed: {reason}")]
    ChannelClosed { reason: String },
}

/// Session registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No session registered for call {call_id}")]
    NotFound { call_id: String },
}

/// Master error type for all Switchboard errors.
#[derive(Debug, Clone, Error)]
pub enum SwitchboardError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Loop error: {0}")]
    Loop(#[from] LoopError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolExecutionError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Result type alias for Switchboard operations.
pub type SwitchboardResult<T> = Result<T, SwitchboardError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::RequiredFieldMissing {
            field: "content".to_string(),
        };
        assert!(format!("{err}").contains("content"));
    }

    #[test]
    fn test_sync_error_display_not_found() {
        let err = SyncError::EntityNotFound {
            kind: "turn".to_string(),
            key: "018f-dead-beef".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("not found"));
        assert!(msg.contains("018f-dead-beef"));
    }

    #[test]
    fn test_loop_error_display() {
        let msg = format!("{}", LoopError::AlreadyRunning);
        assert!(msg.contains("already in progress"));
    }

    #[test]
    fn test_master_error_from_variants() {
        let validation = SwitchboardError::from(ValidationError::RequiredFieldMissing {
            field: "content".to_string(),
        });
        assert!(matches!(validation, SwitchboardError::Validation(_)));

        let sync = SwitchboardError::from(SyncError::Other {
            reason: "boom".to_string(),
        });
        assert!(matches!(sync, SwitchboardError::Sync(_)));

        let lp = SwitchboardError::from(LoopError::AlreadyRunning);
        assert!(matches!(lp, SwitchboardError::Loop(_)));

        let relay = SwitchboardError::from(RelayError::MalformedControlPayload {
            field: "context".to_string(),
            reason: "unexpected end of input".to_string(),
        });
        assert!(matches!(relay, SwitchboardError::Relay(_)));

        let registry = SwitchboardError::from(RegistryError::NotFound {
            call_id: "CA0".to_string(),
        });
        assert!(matches!(registry, SwitchboardError::Registry(_)));
    }
}
