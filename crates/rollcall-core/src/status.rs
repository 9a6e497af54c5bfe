//! Single-student status writes.
//!
//! Each call performs exactly one field update on the student document.
//! There is no read-modify-write transaction: concurrent toggles on the
//! same student resolve last-write-wins. Nothing is mutated locally; the
//! new status reaches callers through the next roster emission.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RollcallError;
use crate::models::student::STATUS_FIELD;
use crate::models::{AttendanceStatus, Student};
use crate::store::{DocumentPath, DocumentStore, Fields};

pub struct StatusToggle<S> {
    store: Arc<S>,
}

impl<S> Clone for StatusToggle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> StatusToggle<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Write `status` to one student's live document.
    pub async fn set_status(
        &self,
        school_id: &str,
        class_id: &str,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Result<(), RollcallError> {
        let write_error = |source| RollcallError::Write {
            student_id: student_id.to_string(),
            source,
        };
        let path = DocumentPath::student(school_id, class_id, student_id).map_err(write_error)?;

        let mut fields = Fields::new();
        fields.insert(STATUS_FIELD.to_string(), Value::from(status.as_str()));

        match self.store.update(&path, fields).await {
            Ok(()) => {
                debug!(class_id, student_id, %status, "Status written");
                Ok(())
            }
            Err(e) => {
                warn!(class_id, student_id, %status, error = %e, "Status write failed");
                Err(write_error(e))
            }
        }
    }

    /// Flip a student's status as last observed on the roster and return
    /// the status written.
    pub async fn toggle(
        &self,
        school_id: &str,
        class_id: &str,
        student: &Student,
    ) -> Result<AttendanceStatus, RollcallError> {
        let next = AttendanceStatus::toggled(student.status);
        self.set_status(school_id, class_id, &student.id, next).await?;
        Ok(next)
    }
}
