//! Class listing for a school.

use tracing::debug;

use crate::error::RollcallError;
use crate::models::SchoolClass;
use crate::store::{CollectionPath, DocumentStore};
use crate::utils::cmp_ignore_case;

/// Load every class of a school, ordered by display name.
pub async fn fetch_classes<S: DocumentStore>(
    store: &S,
    school_id: &str,
) -> Result<Vec<SchoolClass>, RollcallError> {
    let collection = CollectionPath::classes(school_id)?;
    let set = store.get_collection(&collection).await?;
    let mut classes: Vec<SchoolClass> = set.documents.iter().map(SchoolClass::from_document).collect();
    classes.sort_by(|a, b| cmp_ignore_case(a.display_name(), b.display_name()));
    debug!(school_id, count = classes.len(), "Classes loaded");
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::store::{Fields, MemoryStore};

    #[tokio::test]
    async fn test_classes_sorted_by_name() {
        let store = MemoryStore::new();
        let classes = CollectionPath::classes("sch").unwrap();
        for (id, name) in [("c1", "grade 6"), ("c2", "Grade 5"), ("c3", "")] {
            let mut fields = Fields::new();
            fields.insert("name".to_string(), json!(name));
            store.insert(&classes.doc(id).unwrap(), fields);
        }

        let loaded = fetch_classes(&store, "sch").await.unwrap();
        let names: Vec<&str> = loaded.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["c3", "Grade 5", "grade 6"]);
    }

    #[tokio::test]
    async fn test_empty_school_id_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            fetch_classes(&store, "").await,
            Err(RollcallError::Store(_))
        ));
    }
}
