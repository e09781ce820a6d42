use thiserror::Error;
use ulid::Ulid;

use crate::hours::HoursError;

use super::conflict::ConflictWith;
use super::guard::BookingBlock;
use super::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("start time is in the past")]
    PastTime,
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("sign in required")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("conflict: {0}")]
    Conflict(ConflictWith),
    #[error("booking not allowed: {}", .block.code())]
    BookingNotAllowed {
        block: BookingBlock,
        public_message: Option<String>,
    },
    #[error("requested {requested} seats but only {available} are reservable")]
    CapacityExceeded { requested: u32, available: u32 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    /// HTTP-class status for the failure.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Validation { .. }
            | EngineError::PastTime
            | EngineError::CapacityExceeded { .. }
            | EngineError::LimitExceeded(_) => 400,
            EngineError::Unauthenticated => 401,
            EngineError::Forbidden(_) | EngineError::BookingNotAllowed { .. } => 403,
            EngineError::NotFound { .. } => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Storage(_) => 500,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { code, .. } => *code,
            EngineError::PastTime => "PAST_TIME",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Unauthenticated => "UNAUTHENTICATED",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::BookingNotAllowed { block, .. } => block.code(),
            EngineError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Storage(_) => "INTERNAL",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StoreError::Conflict(with) => EngineError::Conflict(with),
            StoreError::Invalid(msg) => EngineError::validation("INVALID", msg),
            StoreError::Io(msg) => EngineError::Storage(msg),
        }
    }
}

impl From<HoursError> for EngineError {
    fn from(e: HoursError) -> Self {
        let code = match e {
            HoursError::BadDate(_) => "INVALID_DATE",
            HoursError::UnknownTimezone(_) => "INVALID_TIMEZONE",
            _ => "INVALID_HOURS",
        };
        EngineError::validation(code, e.to_string())
    }
}
