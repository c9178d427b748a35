// ⚠️ Error taxonomy for the session engine and its stores

use thiserror::Error;

/// Failures raised by a `StateStore` backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("value of {size} bytes exceeds the {limit} byte limit")]
    ValueTooLarge { size: usize, limit: usize },

    #[error("store has been closed")]
    Closed,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Failures raised by `SessionEngine` operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid birth year or age: {0:?}")]
    InvalidInput(String),

    #[error("invalid birth year or age: {0}")]
    InvalidAge(i32),

    #[error("{name} aged {age} is too young for a masters category")]
    TooYoung { name: String, age: i32 },

    #[error("row not found: {index} (roster has {len} rowers)")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("could not decode roster state: {0}")]
    DecodeFailure(#[source] serde_json::Error),

    #[error("could not encode roster state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("could not deliver update: {0}")]
    Delivery(String),
}

impl SessionError {
    /// True for errors caused by what the user typed or clicked
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidInput(_)
                | SessionError::InvalidAge(_)
                | SessionError::TooYoung { .. }
                | SessionError::IndexOutOfRange { .. }
        )
    }
}
