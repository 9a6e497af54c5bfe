//! Class metadata as stored under `schools/{school}/classes`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

/// Teacher assigned to a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Teacher {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SchoolClass {
    pub id: String,
    pub name: String,
    pub teacher: Option<Teacher>,
    /// Subject names in display order.
    pub subjects: Vec<String>,
}

impl SchoolClass {
    pub fn from_document(doc: &Document) -> Self {
        let teacher = match (doc.get_str("teacherId"), doc.get_str("teacherName")) {
            (Some(id), name) => Some(Teacher {
                id: id.to_string(),
                name: name.unwrap_or_default().to_string(),
            }),
            (None, Some(name)) => Some(Teacher {
                id: String::new(),
                name: name.to_string(),
            }),
            (None, None) => None,
        };

        let subjects = doc
            .fields
            .get("subjects")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: doc.id.clone(),
            name: doc.get_str("name").unwrap_or_default().to_string(),
            teacher,
            subjects,
        }
    }

    /// Name to show when the class has no display name.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_document() {
        let fields = serde_json::from_value(json!({
            "name": "Grade 5 - A",
            "teacherId": "t9",
            "teacherName": "Mrs. Iyer",
            "subjects": ["Maths", "Science", 3, "English"]
        }))
        .unwrap();
        let class = SchoolClass::from_document(&Document::new("c1", fields));
        assert_eq!(class.name, "Grade 5 - A");
        assert_eq!(
            class.teacher,
            Some(Teacher {
                id: "t9".to_string(),
                name: "Mrs. Iyer".to_string()
            })
        );
        assert_eq!(class.subjects, vec!["Maths", "Science", "English"]);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let class = SchoolClass::from_document(&Document::new("c2", Default::default()));
        assert_eq!(class.display_name(), "c2");
        assert!(class.teacher.is_none());
    }
}
