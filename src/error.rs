//! Typed error surface for the ask pipeline.
//!
//! Authorization and input-validation failures propagate to the caller as
//! distinct variants; everything else that cannot be degraded locally is an
//! internal error. Retrieval and generation faults never appear here — they
//! are recovered inside the pipeline with empty results or fallback text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The session does not exist, is not owned by the requesting user, or
    /// is no longer active. Never retried.
    #[error("session not found or not accessible")]
    Unauthorized,

    /// The request was malformed (missing query, session, or user).
    /// Rejected before any backend call.
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Stable wire code used in JSON error bodies and stream error events.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::InvalidInput(_) => "bad_request",
            ServiceError::Internal(_) => "internal",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
