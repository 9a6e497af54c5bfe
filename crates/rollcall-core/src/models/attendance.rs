//! Committed attendance history.
//!
//! An `AttendanceSnapshot` is written once and never modified. Its
//! `records` are a frozen copy of the roster at commit time, so later
//! status changes on the live student documents do not reach it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::AttendanceStatus;
use crate::aggregate::ClassCounts;
use crate::store::{Document, Fields, StoreError};

/// One student's status as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub name: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSnapshot {
    /// Document id; not stored as a field.
    #[serde(skip)]
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    /// Calendar day the attendance belongs to.
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub date: NaiveDate,
    pub present: usize,
    pub absent: usize,
    pub total: usize,
    pub records: Vec<AttendanceRecord>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

impl AttendanceSnapshot {
    pub fn counts(&self) -> ClassCounts {
        ClassCounts {
            present: self.present,
            absent: self.absent,
            total: self.total,
        }
    }

    /// Present students as a percentage of the roster, 0 for an empty one.
    pub fn attendance_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.present as f64 * 100.0 / self.total as f64
        }
    }

    pub fn to_fields(&self) -> Result<Fields, StoreError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(StoreError::Serialization(format!(
                "snapshot serialized to non-object: {}",
                other
            ))),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut snapshot: Self =
            serde_json::from_value(serde_json::Value::Object(doc.fields.clone()))?;
        snapshot.id = doc.id.clone();
        Ok(snapshot)
    }
}
