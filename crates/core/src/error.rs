//! Error taxonomy for the decision core.
//!
//! Every error maps onto an [`ErrorKind`] which decides how the engines react:
//! transient failures are retried on the next natural tick, divergences are
//! corrected from exchange truth, config errors are rejected at the point of
//! application, and fatal errors halt only the affected side.

use thiserror::Error;
use uuid::Uuid;

use crate::milestone::MilestoneId;
use crate::position::PositionState;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Divergence,
    Config,
    Fatal,
}

/// Errors raised by an exchange port implementation or its timeout wrapper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// Call did not complete within the configured bound.
    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    /// Exchange refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The exchange holds no position to reduce.
    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Credential or permission failure.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ExchangeError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Fatal,
            Self::PositionNotFound(_) => ErrorKind::Divergence,
            Self::Timeout(_)
            | Self::Network(_)
            | Self::Rejected(_)
            | Self::InsufficientBalance(_) => ErrorKind::Transient,
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }
}

/// Invalid or unloadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Errors surfaced by the position, operation, and session engines.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("position {id}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: PositionState,
        to: PositionState,
    },

    #[error("{side} side halted: {reason}")]
    SideHalted { side: Side, reason: String },

    #[error("{side} operation is stopped")]
    OperationStopped { side: Side },

    #[error("no free slot on {side} side")]
    NoFreeSlot { side: Side },

    #[error("unknown position {0}")]
    UnknownPosition(Uuid),

    #[error("unknown milestone {0}")]
    UnknownMilestone(MilestoneId),

    #[error("milestone parent {0} is unknown or already resolved")]
    MilestoneParent(MilestoneId),

    #[error("no price available for {side} side")]
    NoPrice { side: Side },
}

impl EngineError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Exchange(e) => e.kind(),
            Self::Config(_) | Self::MilestoneParent(_) => ErrorKind::Config,
            Self::SideHalted { .. } => ErrorKind::Fatal,
            Self::InvalidTransition { .. } | Self::UnknownPosition(_) => ErrorKind::Divergence,
            Self::OperationStopped { .. }
            | Self::NoFreeSlot { .. }
            | Self::UnknownMilestone(_)
            | Self::NoPrice { .. } => ErrorKind::Transient,
        }
    }
}
