/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use http::StatusCode;
use thiserror::Error;

/// Pipeline errors with their HTTP mapping. Structural problems surface
/// before any side effect; store failures abort the request.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Content type is not an activity media type. The historical surface
    /// answered 404 here (the route simply did not match) and clients depend
    /// on it.
    #[error("not found")]
    UnsupportedMediaType,
    #[error("'{0}' not found on this instance")]
    UnknownActor(String),
    #[error("Invalid activity")]
    InvalidActivity,
    #[error("actor mismatch")]
    ActorMismatch,
    #[error("not owner")]
    OwnershipViolation,
    #[error("missing target")]
    MissingTarget,
    #[error("missing object")]
    MissingObject,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl OutboxError {
    pub fn status(&self) -> StatusCode {
        match self {
            OutboxError::UnsupportedMediaType => StatusCode::NOT_FOUND,
            OutboxError::UnknownActor(_) => StatusCode::NOT_FOUND,
            OutboxError::InvalidActivity => StatusCode::BAD_REQUEST,
            OutboxError::ActorMismatch => StatusCode::FORBIDDEN,
            OutboxError::OwnershipViolation => StatusCode::FORBIDDEN,
            OutboxError::MissingTarget => StatusCode::BAD_REQUEST,
            OutboxError::MissingObject => StatusCode::BAD_REQUEST,
            OutboxError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
