//! Live per-class roster views.
//!
//! `SubscriptionManager` owns one store stream per (school, class) key and
//! shares it across every caller that subscribes to the same key. A pump
//! task turns each emitted document set into a `RosterSnapshot` and
//! publishes it on a `watch` channel; each `RosterSubscription` holds a
//! receiver on that channel plus a reference on the key. The stream is
//! released when the last reference goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::{compute_class_counts, ClassCounts};
use crate::error::RollcallError;
use crate::models::Student;
use crate::store::{CollectionPath, DocumentStore, DocumentStream};
use crate::utils::cmp_ignore_case;

/// Identifies one class roster within one school.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey {
    pub school_id: String,
    pub class_id: String,
}

impl ClassKey {
    pub fn new(school_id: &str, class_id: &str) -> Self {
        Self {
            school_id: school_id.to_string(),
            class_id: class_id.to_string(),
        }
    }
}

/// The latest known state of one roster.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    /// Full roster in store order (unsorted).
    pub students: Arc<Vec<Student>>,
    /// Number of store emissions (rosters and errors) seen so far.
    pub revision: u64,
    /// True once at least one roster has arrived.
    pub loaded: bool,
    /// Last stream error; cleared by the next good roster.
    pub error: Option<String>,
}

impl RosterSnapshot {
    /// Roster in presentation order: name (case-insensitive), then roll
    /// number, then id.
    pub fn sorted(&self) -> Vec<Student> {
        let mut students = self.students.as_ref().clone();
        students.sort_by(|a, b| {
            cmp_ignore_case(&a.name, &b.name)
                .then_with(|| a.roll_number.cmp(&b.roll_number))
                .then_with(|| a.id.cmp(&b.id))
        });
        students
    }

    pub fn counts(&self) -> ClassCounts {
        compute_class_counts(&self.students)
    }

    /// True while the roster shown is older than a reported stream error.
    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }
}

/// Source of stream ids, so a handle on a stream that has since been
/// replaced never releases its successor.
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

struct Entry {
    stream_id: u64,
    refs: usize,
    rx: watch::Receiver<RosterSnapshot>,
    pump: JoinHandle<()>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

type Registry = Mutex<HashMap<ClassKey, Entry>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<ClassKey, Entry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop one reference on stream `stream_id` of `key`, closing the stream
/// with the last one.
fn release(registry: &Registry, key: &ClassKey, stream_id: u64) {
    let mut entries = lock(registry);
    let Some(entry) = entries.get_mut(key).filter(|e| e.stream_id == stream_id) else {
        return;
    };
    entry.refs = entry.refs.saturating_sub(1);
    if entry.refs == 0 {
        if entries.remove(key).is_some() {
            info!(school_id = %key.school_id, class_id = %key.class_id, "Roster stream closed");
        }
    } else {
        debug!(class_id = %key.class_id, refs = entry.refs, "Roster subscriber left");
    }
}

/// Forward store emissions into the roster channel until the stream ends
/// or the task is aborted.
async fn pump_roster(key: ClassKey, mut stream: DocumentStream, tx: watch::Sender<RosterSnapshot>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(set) => {
                let students: Vec<Student> =
                    set.documents.iter().map(Student::from_document).collect();
                debug!(class_id = %key.class_id, count = students.len(), "Roster updated");
                tx.send_modify(|snapshot| {
                    snapshot.students = Arc::new(students);
                    snapshot.revision += 1;
                    snapshot.loaded = true;
                    snapshot.error = None;
                });
            }
            Err(e) => {
                warn!(
                    school_id = %key.school_id,
                    class_id = %key.class_id,
                    error = %e,
                    "Roster stream error, keeping last known roster"
                );
                tx.send_modify(|snapshot| {
                    snapshot.revision += 1;
                    snapshot.error = Some(e.to_string());
                });
            }
        }
    }
    debug!(class_id = %key.class_id, "Roster stream ended");
}

/// Registry of open roster streams, reference-counted per class.
pub struct SubscriptionManager<S> {
    store: Arc<S>,
    registry: Arc<Registry>,
}

impl<S> Clone for SubscriptionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: DocumentStore> SubscriptionManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Subscribe to a class roster.
    ///
    /// Returns `Ok(None)` without opening anything when either id is empty.
    /// Subscribing to a key that is already open shares its stream.
    /// Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        school_id: &str,
        class_id: &str,
    ) -> Result<Option<RosterSubscription>, RollcallError> {
        if school_id.is_empty() || class_id.is_empty() {
            debug!(school_id, class_id, "Empty id, not subscribing");
            return Ok(None);
        }

        let key = ClassKey::new(school_id, class_id);
        let mut entries = lock(&self.registry);

        // A stream whose pump has finished no longer receives changes.
        if entries.get(&key).is_some_and(|entry| entry.pump.is_finished()) {
            entries.remove(&key);
            info!(school_id = %key.school_id, class_id = %key.class_id, "Reopening ended roster stream");
        }

        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            debug!(class_id = %key.class_id, refs = entry.refs, "Sharing roster stream");
            return Ok(Some(RosterSubscription::new(
                key,
                entry.stream_id,
                entry.rx.clone(),
                Arc::downgrade(&self.registry),
            )));
        }

        let subscription_error = |source| RollcallError::Subscription {
            class_id: class_id.to_string(),
            source,
        };
        let collection = CollectionPath::students(school_id, class_id).map_err(subscription_error)?;
        let stream = self
            .store
            .subscribe_query(&collection)
            .map_err(subscription_error)?;

        let (tx, rx) = watch::channel(RosterSnapshot::default());
        let pump = tokio::spawn(pump_roster(key.clone(), stream, tx));
        let stream_id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.clone(),
            Entry {
                stream_id,
                refs: 1,
                rx: rx.clone(),
                pump,
            },
        );
        info!(school_id = %key.school_id, class_id = %key.class_id, "Roster stream opened");

        Ok(Some(RosterSubscription::new(
            key,
            stream_id,
            rx,
            Arc::downgrade(&self.registry),
        )))
    }

    /// Number of distinct roster streams still receiving changes.
    pub fn open_streams(&self) -> usize {
        lock(&self.registry)
            .values()
            .filter(|entry| !entry.pump.is_finished())
            .count()
    }

    /// Number of live subscriptions sharing the stream for a class.
    pub fn subscriber_count(&self, school_id: &str, class_id: &str) -> usize {
        lock(&self.registry)
            .get(&ClassKey::new(school_id, class_id))
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }
}

/// One caller's handle on a live class roster.
///
/// Dropping the handle unsubscribes it.
pub struct RosterSubscription {
    key: ClassKey,
    stream_id: u64,
    rx: watch::Receiver<RosterSnapshot>,
    registry: Weak<Registry>,
    closed: bool,
}

impl RosterSubscription {
    fn new(
        key: ClassKey,
        stream_id: u64,
        rx: watch::Receiver<RosterSnapshot>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            key,
            stream_id,
            rx,
            registry,
            closed: false,
        }
    }

    pub fn key(&self) -> &ClassKey {
        &self.key
    }

    /// Latest roster without waiting.
    pub fn latest(&self) -> RosterSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next roster emission not yet seen by this handle.
    ///
    /// Returns `None` once unsubscribed or when the underlying stream ends.
    pub async fn next(&mut self) -> Option<RosterSnapshot> {
        if self.closed {
            return None;
        }
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Release this handle's reference on the stream. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(registry) = self.registry.upgrade() {
            release(&registry, &self.key, self.stream_id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for RosterSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use crate::models::AttendanceStatus;
    use crate::store::{DocumentPath, Fields, MemoryStore};

    const WAIT: Duration = Duration::from_secs(2);

    fn fields(value: serde_json::Value) -> Fields {
        serde_json::from_value(value).unwrap()
    }

    fn seed(store: &MemoryStore, class_id: &str, students: &[(&str, &str, Option<&str>)]) {
        for (id, name, status) in students {
            let mut doc = fields(json!({ "name": name }));
            if let Some(status) = status {
                doc.insert("status".to_string(), json!(status));
            }
            store.insert(&DocumentPath::student("sch", class_id, id).unwrap(), doc);
        }
    }

    async fn next_loaded(sub: &mut RosterSubscription) -> RosterSnapshot {
        loop {
            let snapshot = timeout(WAIT, sub.next()).await.unwrap().unwrap();
            if snapshot.loaded {
                return snapshot;
            }
        }
    }

    #[tokio::test]
    async fn test_empty_ids_open_nothing() {
        let store = Arc::new(MemoryStore::new());
        let manager = SubscriptionManager::new(Arc::clone(&store));
        assert!(manager.subscribe("", "c1").unwrap().is_none());
        assert!(manager.subscribe("sch", "").unwrap().is_none());
        assert_eq!(manager.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_emits_full_roster_on_change() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "c1", &[("s1", "Asha", Some("present"))]);
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut sub = manager.subscribe("sch", "c1").unwrap().unwrap();

        let first = next_loaded(&mut sub).await;
        assert_eq!(first.students.len(), 1);

        seed(&store, "c1", &[("s2", "Ben", None)]);
        let second = next_loaded(&mut sub).await;
        assert_eq!(second.students.len(), 2);
        assert_eq!(
            second.counts(),
            ClassCounts {
                present: 1,
                absent: 0,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn test_sorted_is_case_insensitive_by_name() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "c1",
            &[("s1", "zara", None), ("s2", "Ben", None), ("s3", "asha", None)],
        );
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut sub = manager.subscribe("sch", "c1").unwrap().unwrap();
        let snapshot = next_loaded(&mut sub).await;
        let names: Vec<String> = snapshot.sorted().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["asha", "Ben", "zara"]);
    }

    #[tokio::test]
    async fn test_sorted_places_accented_names_with_their_letter() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "c1",
            &[("s1", "Zara", None), ("s2", "Émile", None), ("s3", "Ben", None)],
        );
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut sub = manager.subscribe("sch", "c1").unwrap().unwrap();
        let snapshot = next_loaded(&mut sub).await;
        let names: Vec<String> = snapshot.sorted().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Ben", "Émile", "Zara"]);
    }

    /// Store whose live queries deliver one roster and then end.
    #[derive(Default)]
    struct OneShotStore {
        opened: std::sync::atomic::AtomicUsize,
    }

    impl DocumentStore for OneShotStore {
        fn subscribe_query(
            &self,
            collection: &CollectionPath,
        ) -> Result<DocumentStream, crate::store::StoreError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let set = crate::store::DocumentSet {
                collection: collection.clone(),
                documents: vec![crate::store::Document::new("s1", fields(json!({ "name": "Asha" })))],
            };
            Ok(futures::stream::iter(vec![Ok(set)]).boxed())
        }

        async fn get_collection(
            &self,
            collection: &CollectionPath,
        ) -> Result<crate::store::DocumentSet, crate::store::StoreError> {
            Ok(crate::store::DocumentSet {
                collection: collection.clone(),
                documents: Vec::new(),
            })
        }

        async fn update(
            &self,
            _path: &DocumentPath,
            _fields: Fields,
        ) -> Result<(), crate::store::StoreError> {
            Ok(())
        }

        async fn batch_write(
            &self,
            _ops: Vec<crate::store::WriteOp>,
        ) -> Result<(), crate::store::StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ended_stream_is_reopened_on_subscribe() {
        let store = Arc::new(OneShotStore::default());
        let manager = SubscriptionManager::new(Arc::clone(&store));

        let mut first = manager.subscribe("sch", "c1").unwrap().unwrap();
        assert_eq!(next_loaded(&mut first).await.students.len(), 1);
        // The store stream ends, so the handle sees the channel close.
        assert!(timeout(WAIT, first.next()).await.unwrap().is_none());
        assert_eq!(manager.open_streams(), 0);

        let mut second = manager.subscribe("sch", "c1").unwrap().unwrap();
        assert_eq!(store.opened.load(Ordering::SeqCst), 2);
        assert_eq!(next_loaded(&mut second).await.students.len(), 1);

        // Releasing the handle on the ended stream leaves the new one alone.
        drop(first);
        assert_eq!(manager.subscriber_count("sch", "c1"), 1);
    }

    #[tokio::test]
    async fn test_same_key_shares_one_stream() {
        let store = Arc::new(MemoryStore::new());
        let collection = CollectionPath::students("sch", "c1").unwrap();
        let manager = SubscriptionManager::new(Arc::clone(&store));

        let mut a = manager.subscribe("sch", "c1").unwrap().unwrap();
        let b = manager.subscribe("sch", "c1").unwrap().unwrap();
        assert_eq!(manager.open_streams(), 1);
        assert_eq!(manager.subscriber_count("sch", "c1"), 2);
        assert_eq!(store.watcher_count(&collection), 1);

        a.unsubscribe();
        assert_eq!(manager.subscriber_count("sch", "c1"), 1);
        assert_eq!(manager.open_streams(), 1);

        drop(b);
        assert_eq!(manager.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_silences() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "c1", &[("s1", "Asha", None)]);
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut keep = manager.subscribe("sch", "c1").unwrap().unwrap();
        let mut sub = manager.subscribe("sch", "c1").unwrap().unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(sub.is_closed());
        assert_eq!(manager.subscriber_count("sch", "c1"), 1);

        seed(&store, "c1", &[("s2", "Ben", None)]);
        assert!(sub.next().await.is_none());
        // The remaining subscriber is unaffected.
        let snapshot = next_loaded(&mut keep).await;
        assert!(!snapshot.students.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_keeps_last_roster() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "c1",
            &[("s1", "Asha", Some("present")), ("s2", "Ben", Some("absent"))],
        );
        let collection = CollectionPath::students("sch", "c1").unwrap();
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut sub = manager.subscribe("sch", "c1").unwrap().unwrap();
        next_loaded(&mut sub).await;

        store.break_subscriptions(&collection, "connection reset");
        let stale = timeout(WAIT, sub.next()).await.unwrap().unwrap();
        assert!(stale.is_stale());
        assert_eq!(stale.students.len(), 2);
        assert_eq!(stale.students[0].status, Some(AttendanceStatus::Present));

        seed(&store, "c1", &[("s3", "Cal", None)]);
        let fresh = next_loaded(&mut sub).await;
        assert!(!fresh.is_stale());
        assert_eq!(fresh.students.len(), 3);
    }

    #[tokio::test]
    async fn test_refused_stream_is_subscription_error() {
        let store = Arc::new(MemoryStore::new());
        store.refuse_subscriptions(Some("offline".to_string()));
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let err = manager.subscribe("sch", "c1").err().unwrap();
        assert!(matches!(err, RollcallError::Subscription { .. }));
        assert_eq!(manager.open_streams(), 0);
    }
}
