//! Session error taxonomy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::serial::CommandId;
use crate::error::{Effect, Transience};

/// Execution error codes a peer can report for a failed command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorCode {
    UnauthorizedAccess,
    NotFound,
    ResourceLocked,
    PreconditionFailed,
    ResourceDeleted,
    IllegalState,
    CommandInvalid,
    ResourceLimitExceeded,
    NotAllowed,
    IllegalArgument,
    NotImplemented,
    InternalError,
    InvalidArgument,
}

impl ExecutionErrorCode {
    pub fn code(self) -> u16 {
        match self {
            ExecutionErrorCode::UnauthorizedAccess => 403,
            ExecutionErrorCode::NotFound => 404,
            ExecutionErrorCode::ResourceLocked => 405,
            ExecutionErrorCode::PreconditionFailed => 406,
            ExecutionErrorCode::ResourceDeleted => 408,
            ExecutionErrorCode::IllegalState => 409,
            ExecutionErrorCode::CommandInvalid => 503,
            ExecutionErrorCode::ResourceLimitExceeded => 506,
            ExecutionErrorCode::NotAllowed => 530,
            ExecutionErrorCode::IllegalArgument => 531,
            ExecutionErrorCode::NotImplemented => 540,
            ExecutionErrorCode::InternalError => 541,
            ExecutionErrorCode::InvalidArgument => 542,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let parsed = match code {
            403 => ExecutionErrorCode::UnauthorizedAccess,
            404 => ExecutionErrorCode::NotFound,
            405 => ExecutionErrorCode::ResourceLocked,
            406 => ExecutionErrorCode::PreconditionFailed,
            408 => ExecutionErrorCode::ResourceDeleted,
            409 => ExecutionErrorCode::IllegalState,
            503 => ExecutionErrorCode::CommandInvalid,
            506 => ExecutionErrorCode::ResourceLimitExceeded,
            530 => ExecutionErrorCode::NotAllowed,
            531 => ExecutionErrorCode::IllegalArgument,
            540 => ExecutionErrorCode::NotImplemented,
            541 => ExecutionErrorCode::InternalError,
            542 => ExecutionErrorCode::InvalidArgument,
            _ => return None,
        };
        Some(parsed)
    }
}

impl fmt::Display for ExecutionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionErrorCode::UnauthorizedAccess => "unauthorized-access",
            ExecutionErrorCode::NotFound => "not-found",
            ExecutionErrorCode::ResourceLocked => "resource-locked",
            ExecutionErrorCode::PreconditionFailed => "precondition-failed",
            ExecutionErrorCode::ResourceDeleted => "resource-deleted",
            ExecutionErrorCode::IllegalState => "illegal-state",
            ExecutionErrorCode::CommandInvalid => "command-invalid",
            ExecutionErrorCode::ResourceLimitExceeded => "resource-limit-exceeded",
            ExecutionErrorCode::NotAllowed => "not-allowed",
            ExecutionErrorCode::IllegalArgument => "illegal-argument",
            ExecutionErrorCode::NotImplemented => "not-implemented",
            ExecutionErrorCode::InternalError => "internal-error",
            ExecutionErrorCode::InvalidArgument => "invalid-argument",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Peer-reported failure of a command on this session.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("execution exception {error_code} on command {command_id:?}: {description}")]
pub struct ExecutionException {
    pub error_code: ExecutionErrorCode,
    pub command_id: Option<CommandId>,
    pub description: String,
}

impl ExecutionException {
    pub fn new(error_code: ExecutionErrorCode, description: impl Into<String>) -> Self {
        Self {
            error_code,
            command_id: None,
            description: description.into(),
        }
    }

    pub fn with_command(mut self, command_id: CommandId) -> Self {
        self.command_id = Some(command_id);
        self
    }
}

/// Failure of a single send or flush through the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SenderError {
    #[error("transport closed")]
    Closed,
    #[error("transport write failed: {reason}")]
    Write { reason: String },
}

impl SenderError {
    pub fn write(reason: impl Into<String>) -> Self {
        SenderError::Write {
            reason: reason.into(),
        }
    }
}

/// Typed failure for every public session operation.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A blocking operation ran out of time while the session was healthy.
    #[error("{operation}: timed out after {waited:?}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },
    /// A blocking operation was aborted because the transport failed over.
    #[error("{operation}: interrupted by failover")]
    Cancelled { operation: &'static str },
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    PeerExecution(#[from] ExecutionException),
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },
    #[error("send failed: {0}")]
    TransientSend(#[from] SenderError),
    #[error("{operation} not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl SessionError {
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        SessionError::ProtocolViolation {
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled { .. })
    }

    pub fn transience(&self) -> Transience {
        match self {
            SessionError::Timeout { .. } | SessionError::TransientSend(_) => Transience::Retryable,
            SessionError::Cancelled { .. } => Transience::Unknown,
            SessionError::Closed
            | SessionError::PeerExecution(_)
            | SessionError::ProtocolViolation { .. }
            | SessionError::InvalidState { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            SessionError::ProtocolViolation { .. } | SessionError::InvalidState { .. } => {
                Effect::None
            }
            SessionError::PeerExecution(_) => Effect::Some,
            SessionError::Timeout { .. }
            | SessionError::Cancelled { .. }
            | SessionError::Closed
            | SessionError::TransientSend(_) => Effect::Unknown,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
