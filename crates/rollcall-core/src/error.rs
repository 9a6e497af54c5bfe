use chrono::NaiveDate;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the attendance engine.
///
/// None of these are fatal to the engine itself and none are retried
/// automatically; retrying is always the caller's decision.
#[derive(Error, Debug)]
pub enum RollcallError {
    #[error("Roster subscription failed for class {class_id}: {source}")]
    Subscription {
        class_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Status write failed for student {student_id}: {source}")]
    Write {
        student_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Attendance commit failed for class {class_id} on {date_key}: {source}")]
    Commit {
        class_id: String,
        date_key: NaiveDate,
        #[source]
        source: StoreError,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RollcallError {
    /// True when the failure happened before anything was sent to the store.
    pub fn is_precondition(&self) -> bool {
        matches!(self, RollcallError::Precondition(_))
    }
}
