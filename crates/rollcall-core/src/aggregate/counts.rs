use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{AttendanceStatus, Student};

/// Present/absent/total counts for one class.
///
/// `total` is always the full roster size. Students with no status count
/// toward `total` only, so `present + absent <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ClassCounts {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

impl ClassCounts {
    /// Students whose status has not been set yet.
    pub fn unset(&self) -> usize {
        self.total
            .saturating_sub(self.present)
            .saturating_sub(self.absent)
    }
}

pub fn compute_class_counts(roster: &[Student]) -> ClassCounts {
    let mut counts = ClassCounts {
        total: roster.len(),
        ..ClassCounts::default()
    };
    for student in roster {
        match student.status {
            Some(AttendanceStatus::Present) => counts.present += 1,
            Some(AttendanceStatus::Absent) => counts.absent += 1,
            None => {}
        }
    }
    counts
}

/// Sum the last-known totals of every tracked class.
pub fn compute_grand_total<K>(totals: &HashMap<K, usize>) -> usize {
    totals.values().sum()
}
