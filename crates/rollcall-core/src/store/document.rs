use futures::stream::BoxStream;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use super::{CollectionPath, DocumentPath, StoreError};

/// Length of generated document ids.
const DOCUMENT_ID_LENGTH: usize = 20;

/// Top-level document fields.
pub type Fields = serde_json::Map<String, Value>;

/// Live query stream: every item is the full current result set.
pub type DocumentStream = BoxStream<'static, Result<DocumentSet, StoreError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Read a field that may be stored either as a string or a number.
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// All documents currently matching a query, ordered by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSet {
    pub collection: CollectionPath,
    pub documents: Vec<Document>,
}

impl DocumentSet {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create a new document; fails if it already exists.
    Create { path: DocumentPath, fields: Fields },
    /// Merge fields into an existing document; fails if it is missing.
    Update { path: DocumentPath, fields: Fields },
}

impl WriteOp {
    pub fn path(&self) -> &DocumentPath {
        match self {
            WriteOp::Create { path, .. } | WriteOp::Update { path, .. } => path,
        }
    }
}

/// Generate a fresh random document id.
pub fn new_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_document_id_shape() {
        let a = new_document_id();
        let b = new_document_id();
        assert_eq!(a.len(), DOCUMENT_ID_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_text_accepts_numbers() {
        let mut fields = Fields::new();
        fields.insert("rollNumber".to_string(), json!(12));
        fields.insert("name".to_string(), json!("Asha"));
        let doc = Document::new("s1", fields);
        assert_eq!(doc.get_text("rollNumber").as_deref(), Some("12"));
        assert_eq!(doc.get_str("name"), Some("Asha"));
        assert_eq!(doc.get_str("missing"), None);
    }
}
