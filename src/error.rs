//! Error types for duelnet.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DuelNetError>;

#[derive(Error, Debug)]
pub enum DuelNetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DuelNetError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }
}
