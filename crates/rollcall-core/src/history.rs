//! Reading committed attendance history.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::RollcallError;
use crate::models::AttendanceSnapshot;
use crate::store::{CollectionPath, DocumentStore};

/// Which snapshots to return. All bounds are optional and inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub class_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl HistoryFilter {
    pub fn for_class(class_id: &str) -> Self {
        Self {
            class_id: Some(class_id.to_string()),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, snapshot: &AttendanceSnapshot) -> bool {
        if let Some(ref class_id) = self.class_id {
            if &snapshot.class_id != class_id {
                return false;
            }
        }
        if self.from.is_some_and(|from| snapshot.date < from) {
            return false;
        }
        if self.to.is_some_and(|to| snapshot.date > to) {
            return false;
        }
        true
    }
}

/// Load committed snapshots for a school, newest day first.
///
/// Snapshots committed on the same day are ordered by commit time, newest
/// first. Records that fail to parse are skipped and logged.
pub async fn fetch_history<S: DocumentStore>(
    store: &S,
    school_id: &str,
    filter: &HistoryFilter,
) -> Result<Vec<AttendanceSnapshot>, RollcallError> {
    let collection = CollectionPath::attendance(school_id)?;
    let set = store.get_collection(&collection).await?;

    let mut snapshots: Vec<AttendanceSnapshot> = set
        .documents
        .iter()
        .filter_map(|doc| match AttendanceSnapshot::from_document(doc) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(record_id = %doc.id, error = %e, "Skipping unreadable attendance record");
                None
            }
        })
        .filter(|snapshot| filter.matches(snapshot))
        .collect();

    snapshots.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    debug!(school_id, count = snapshots.len(), "Attendance history loaded");
    Ok(snapshots)
}
