//! Typed document and collection paths.
//!
//! Paths alternate collection and document segments, e.g.
//! `schools/{school}/classes/{class}/students/{student}`. Builders reject
//! empty ids and ids containing `/` so a caller can never address the
//! wrong tenant by accident.

use std::fmt;

use super::StoreError;

const SCHOOLS: &str = "schools";
const CLASSES: &str = "classes";
const STUDENTS: &str = "students";
const ATTENDANCE: &str = "attendance";

fn check_segment(kind: &str, id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidPath(format!("empty {} id", kind)));
    }
    if id.contains('/') {
        return Err(StoreError::InvalidPath(format!(
            "{} id must not contain '/': {}",
            kind, id
        )));
    }
    Ok(())
}

/// Path of a collection (odd number of segments).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// `schools/{school_id}/classes/{class_id}/students`
    pub fn students(school_id: &str, class_id: &str) -> Result<Self, StoreError> {
        check_segment("school", school_id)?;
        check_segment("class", class_id)?;
        Ok(Self(format!(
            "{}/{}/{}/{}/{}",
            SCHOOLS, school_id, CLASSES, class_id, STUDENTS
        )))
    }

    /// `schools/{school_id}/classes`
    pub fn classes(school_id: &str) -> Result<Self, StoreError> {
        check_segment("school", school_id)?;
        Ok(Self(format!("{}/{}/{}", SCHOOLS, school_id, CLASSES)))
    }

    /// `schools/{school_id}/attendance`
    pub fn attendance(school_id: &str) -> Result<Self, StoreError> {
        check_segment("school", school_id)?;
        Ok(Self(format!("{}/{}/{}", SCHOOLS, school_id, ATTENDANCE)))
    }

    /// Parse a raw collection path, as found in a data file.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() % 2 == 0 || segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn doc(&self, id: &str) -> Result<DocumentPath, StoreError> {
        check_segment("document", id)?;
        Ok(DocumentPath {
            collection: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    /// `schools/{school_id}/classes/{class_id}/students/{student_id}`
    pub fn student(school_id: &str, class_id: &str, student_id: &str) -> Result<Self, StoreError> {
        CollectionPath::students(school_id, class_id)?.doc(student_id)
    }

    /// `schools/{school_id}/attendance/{record_id}`
    pub fn attendance_record(school_id: &str, record_id: &str) -> Result<Self, StoreError> {
        CollectionPath::attendance(school_id)?.doc(record_id)
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
