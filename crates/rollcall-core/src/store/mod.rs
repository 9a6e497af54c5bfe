//! Document store contract consumed by the attendance engine.
//!
//! The engine never talks to a database directly. It consumes the
//! `DocumentStore` trait, which offers live collection queries and atomic
//! multi-document batch writes. `MemoryStore` is the in-process
//! implementation used by tests and the local CLI.

pub mod document;
pub mod error;
pub mod memory;
pub mod path;

use std::future::Future;

pub use document::{new_document_id, Document, DocumentSet, DocumentStream, Fields, WriteOp};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use path::{CollectionPath, DocumentPath};

/// A document database with live queries and atomic batches.
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a live query over a collection.
    ///
    /// The stream yields the full matching set immediately and again after
    /// every change. Dropping the stream cancels the query.
    fn subscribe_query(&self, collection: &CollectionPath) -> Result<DocumentStream, StoreError>;

    /// Read a collection once.
    fn get_collection(
        &self,
        collection: &CollectionPath,
    ) -> impl Future<Output = Result<DocumentSet, StoreError>> + Send;

    /// Merge fields into one existing document.
    fn update(
        &self,
        path: &DocumentPath,
        fields: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply every operation or none of them.
    fn batch_write(&self, ops: Vec<WriteOp>) -> impl Future<Output = Result<(), StoreError>> + Send;
}
