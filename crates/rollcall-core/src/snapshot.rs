//! Committing a day's attendance.
//!
//! A commit captures one class roster into a new `AttendanceSnapshot` and,
//! in the same atomic batch, writes every student's normalized status back
//! to their live document. Either the record and all status writes land,
//! or none of them do.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{error, info};

use crate::aggregate::compute_class_counts;
use crate::error::RollcallError;
use crate::models::student::STATUS_FIELD;
use crate::models::{AttendanceRecord, AttendanceSnapshot, Student};
use crate::store::{new_document_id, DocumentPath, DocumentStore, Fields, StoreError, WriteOp};

/// Freeze a roster into a snapshot with a fresh id.
///
/// Counts use the live counting rule (unset students count toward the
/// total only); the frozen per-student records default unset to absent.
pub fn capture_snapshot(
    class_id: &str,
    class_name: &str,
    roster: &[Student],
    date_key: NaiveDate,
) -> AttendanceSnapshot {
    let counts = compute_class_counts(roster);
    let records = roster
        .iter()
        .map(|student| AttendanceRecord {
            student_id: student.id.clone(),
            name: student.name.clone(),
            status: student.normalized_status(),
        })
        .collect();

    AttendanceSnapshot {
        id: new_document_id(),
        class_id: class_id.to_string(),
        class_name: class_name.to_string(),
        date: date_key,
        present: counts.present,
        absent: counts.absent,
        total: counts.total,
        records,
        created_at: Utc::now(),
    }
}

/// Build the batch for a commit: the snapshot create followed by one
/// status update per student.
pub fn build_commit_ops(
    school_id: &str,
    class_id: &str,
    snapshot: &AttendanceSnapshot,
    roster: &[Student],
) -> Result<Vec<WriteOp>, StoreError> {
    let mut ops = Vec::with_capacity(roster.len() + 1);
    ops.push(WriteOp::Create {
        path: DocumentPath::attendance_record(school_id, &snapshot.id)?,
        fields: snapshot.to_fields()?,
    });
    for student in roster {
        let mut fields = Fields::new();
        fields.insert(
            STATUS_FIELD.to_string(),
            Value::from(student.normalized_status().as_str()),
        );
        ops.push(WriteOp::Update {
            path: DocumentPath::student(school_id, class_id, &student.id)?,
            fields,
        });
    }
    Ok(ops)
}

pub struct SnapshotCommitter<S> {
    store: Arc<S>,
}

impl<S> Clone for SnapshotCommitter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> SnapshotCommitter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Commit one class's attendance for `date_key`.
    ///
    /// Every call creates a new record, including repeat commits for the
    /// same class and day. On failure nothing has been written and the
    /// caller may retry with a freshly read roster.
    pub async fn commit_daily_attendance(
        &self,
        school_id: &str,
        class_id: &str,
        class_name: &str,
        roster: &[Student],
        date_key: NaiveDate,
    ) -> Result<AttendanceSnapshot, RollcallError> {
        if roster.is_empty() {
            return Err(RollcallError::Precondition(format!(
                "nothing to save: class {} has no students",
                class_id
            )));
        }

        let commit_error = |source| RollcallError::Commit {
            class_id: class_id.to_string(),
            date_key,
            source,
        };

        let snapshot = capture_snapshot(class_id, class_name, roster, date_key);
        let ops = build_commit_ops(school_id, class_id, &snapshot, roster).map_err(commit_error)?;
        let op_count = ops.len();

        if let Err(e) = self.store.batch_write(ops).await {
            error!(
                school_id,
                class_id,
                date = %date_key,
                error = %e,
                "Attendance commit failed, nothing written"
            );
            return Err(commit_error(e));
        }

        info!(
            school_id,
            class_id,
            date = %date_key,
            record_id = %snapshot.id,
            present = snapshot.present,
            absent = snapshot.absent,
            total = snapshot.total,
            writes = op_count,
            "Attendance committed"
        );
        Ok(snapshot)
    }
}
