use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::Document;

/// Stored field names on a student document.
pub const STATUS_FIELD: &str = "status";
const NAME_FIELD: &str = "name";
const ROLL_NUMBER_FIELD: &str = "rollNumber";

/// A student's attendance status for the current day.
///
/// The third logical state, "unset", is represented as `None` wherever a
/// status is held as `Option<AttendanceStatus>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    /// Parse a stored status value. Anything other than the exact
    /// lowercase names is treated as unset.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    /// Status a toggle writes: present flips to absent, everything else
    /// (absent or unset) advances to present.
    pub fn toggled(current: Option<Self>) -> Self {
        match current {
            Some(AttendanceStatus::Present) => AttendanceStatus::Absent,
            Some(AttendanceStatus::Absent) | None => AttendanceStatus::Present,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default an unset status to absent.
///
/// The single place this defaulting rule lives; snapshot capture and the
/// live status sync both go through it.
pub fn normalize_status(raw: Option<AttendanceStatus>) -> AttendanceStatus {
    raw.unwrap_or(AttendanceStatus::Absent)
}

/// A student as observed on a class roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_number: Option<String>,
    pub status: Option<AttendanceStatus>,
}

impl Student {
    /// Build a student from its store document. Missing fields are
    /// tolerated so a malformed document still counts toward the roster.
    pub fn from_document(doc: &Document) -> Self {
        let status = match doc.get_str(STATUS_FIELD) {
            Some(raw) => {
                let parsed = AttendanceStatus::parse(raw);
                if parsed.is_none() {
                    debug!(student_id = %doc.id, status = raw, "Unrecognized status, treating as unset");
                }
                parsed
            }
            None => None,
        };

        Self {
            id: doc.id.clone(),
            name: doc.get_str(NAME_FIELD).unwrap_or_default().to_string(),
            roll_number: doc.get_text(ROLL_NUMBER_FIELD),
            status,
        }
    }

    pub fn normalized_status(&self) -> AttendanceStatus {
        normalize_status(self.status)
    }
}
