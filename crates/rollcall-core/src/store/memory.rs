//! In-process document store.
//!
//! Holds every collection in memory, pushes the full result set to each
//! live query whenever a write touches its collection, and applies batches
//! against a staged copy so a failing operation leaves nothing behind.
//! The whole store can be loaded from and saved to a JSON data file.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use tracing::{debug, warn};

use super::{
    CollectionPath, Document, DocumentPath, DocumentSet, DocumentStore, DocumentStream, Fields,
    StoreError, WriteOp,
};

type Collections = BTreeMap<CollectionPath, BTreeMap<String, Fields>>;
type Watcher = UnboundedSender<Result<DocumentSet, StoreError>>;

/// On-disk layout: collection path -> document id -> fields.
type DataFile = BTreeMap<String, BTreeMap<String, Fields>>;

#[derive(Default)]
struct MemoryState {
    collections: Collections,
    watchers: HashMap<CollectionPath, Vec<Watcher>>,
    failing_writes: usize,
    refused_subscriptions: Option<String>,
}

impl MemoryState {
    fn snapshot(&self, collection: &CollectionPath) -> DocumentSet {
        let documents = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();
        DocumentSet {
            collection: collection.clone(),
            documents,
        }
    }

    /// Push the current set to every live query on `collection`,
    /// forgetting queries whose stream has been dropped.
    fn notify(&mut self, collection: &CollectionPath) {
        let set = self.snapshot(collection);
        if let Some(watchers) = self.watchers.get_mut(collection) {
            watchers.retain(|tx| tx.unbounded_send(Ok(set.clone())).is_ok());
        }
    }
}

fn apply_op(collections: &mut Collections, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Create { path, fields } => {
            let docs = collections.entry(path.collection().clone()).or_default();
            if docs.contains_key(path.id()) {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
            docs.insert(path.id().to_string(), fields.clone());
        }
        WriteOp::Update { path, fields } => {
            let doc = collections
                .get_mut(path.collection())
                .and_then(|docs| docs.get_mut(path.id()))
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            for (key, value) in fields {
                doc.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a document outside of any batch.
    pub fn insert(&self, path: &DocumentPath, fields: Fields) {
        let mut state = self.lock();
        state
            .collections
            .entry(path.collection().clone())
            .or_default()
            .insert(path.id().to_string(), fields);
        state.notify(path.collection());
    }

    pub fn remove(&self, path: &DocumentPath) -> Option<Fields> {
        let mut state = self.lock();
        let removed = state
            .collections
            .get_mut(path.collection())
            .and_then(|docs| docs.remove(path.id()));
        if removed.is_some() {
            state.notify(path.collection());
        }
        removed
    }

    pub fn document(&self, path: &DocumentPath) -> Option<Fields> {
        self.lock()
            .collections
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()))
            .cloned()
    }

    pub fn collection_len(&self, collection: &CollectionPath) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Number of live queries currently open on a collection.
    pub fn watcher_count(&self, collection: &CollectionPath) -> usize {
        self.lock()
            .watchers
            .get(collection)
            .map(|watchers| watchers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Reject the next `count` writes (single updates and batches alike).
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Deliver an error to every live query on `collection`.
    /// The queries stay open and resume with the next change.
    pub fn break_subscriptions(&self, collection: &CollectionPath, message: &str) {
        let mut state = self.lock();
        if let Some(watchers) = state.watchers.get_mut(collection) {
            let err = StoreError::Unavailable(message.to_string());
            watchers.retain(|tx| tx.unbounded_send(Err(err.clone())).is_ok());
        }
    }

    /// Make new live queries fail to open until called again with `None`.
    pub fn refuse_subscriptions(&self, reason: Option<String>) {
        self.lock().refused_subscriptions = reason;
    }

    fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            warn!(ops = ops.len(), "Rejecting write (injected failure)");
            return Err(StoreError::Rejected("injected write failure".to_string()));
        }

        let mut staged = state.collections.clone();
        for op in &ops {
            apply_op(&mut staged, op)?;
        }

        let touched: BTreeSet<CollectionPath> = ops
            .iter()
            .map(|op| op.path().collection().clone())
            .collect();
        state.collections = staged;
        for collection in &touched {
            state.notify(collection);
        }
        debug!(ops = ops.len(), collections = touched.len(), "Batch committed");
        Ok(())
    }

    /// Load a store from a JSON data file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Failed to parse data file: {}", path.display()))
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let data: DataFile = serde_json::from_str(contents)?;
        let mut collections = Collections::new();
        for (raw_path, docs) in data {
            let path = CollectionPath::parse(&raw_path)?;
            collections.insert(path, docs);
        }
        let store = Self::new();
        store.lock().collections = collections;
        Ok(store)
    }

    /// Write every collection back to a JSON data file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let data: DataFile = self
            .lock()
            .collections
            .iter()
            .map(|(collection, docs)| (collection.to_string(), docs.clone()))
            .collect();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&data)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write data file: {}", path.display()))?;
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe_query(&self, collection: &CollectionPath) -> Result<DocumentStream, StoreError> {
        let mut state = self.lock();
        if let Some(reason) = &state.refused_subscriptions {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        let (tx, rx) = unbounded();
        let initial = state.snapshot(collection);
        tx.unbounded_send(Ok(initial))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        state.watchers.entry(collection.clone()).or_default().push(tx);
        debug!(collection = %collection, "Live query opened");
        Ok(rx.boxed())
    }

    async fn get_collection(&self, collection: &CollectionPath) -> Result<DocumentSet, StoreError> {
        Ok(self.lock().snapshot(collection))
    }

    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.apply_batch(vec![WriteOp::Update {
            path: path.clone(),
            fields,
        }])
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.apply_batch(ops)
    }
}
