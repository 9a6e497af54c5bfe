//! School-wide attendance aggregation.
//!
//! The aggregator tracks a set of classes. For each tracked class a
//! forwarder task follows the class roster and sends fresh counts through
//! an MPSC channel; the aggregator applies them and recomputes the grand
//! total from the full class mapping every time. The mapping is only ever
//! touched through `&mut self`, so there is exactly one writer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{compute_grand_total, ClassCounts};
use crate::error::RollcallError;
use crate::roster::{RosterSubscription, SubscriptionManager};
use crate::store::DocumentStore;

/// Buffer size for the count update channel.
/// A few updates per tracked class is plenty; forwarders wait when it fills.
pub const DEFAULT_UPDATE_BUFFER: usize = 64;

/// Fresh counts for one class, tagged with the tracking generation that
/// produced them.
#[derive(Debug)]
struct CountUpdate {
    class_id: String,
    generation: u64,
    counts: ClassCounts,
    /// False while the roster has not arrived yet.
    loaded: bool,
    error: Option<String>,
}

/// Aggregate view over every tracked class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SchoolTotals {
    pub classes: BTreeMap<String, ClassCounts>,
    pub grand_total: usize,
    /// Classes whose roster stream last reported an error.
    pub stale: BTreeSet<String>,
}

struct TrackedClass {
    generation: u64,
    forwarder: JoinHandle<()>,
}

impl Drop for TrackedClass {
    fn drop(&mut self) {
        // Dropping the forwarder drops its roster subscription.
        self.forwarder.abort();
    }
}

async fn forward_counts(
    class_id: String,
    generation: u64,
    mut roster: RosterSubscription,
    tx: mpsc::Sender<CountUpdate>,
) {
    while let Some(snapshot) = roster.next().await {
        let update = CountUpdate {
            class_id: class_id.clone(),
            generation,
            counts: snapshot.counts(),
            loaded: snapshot.loaded,
            error: snapshot.error.clone(),
        };
        if tx.send(update).await.is_err() {
            break;
        }
    }
    debug!(class_id = %class_id, generation, "Count forwarder finished");
}

pub struct AttendanceAggregator<S> {
    school_id: String,
    subscriptions: SubscriptionManager<S>,
    tracked: HashMap<String, TrackedClass>,
    /// Last-known roster size per tracked class.
    totals: HashMap<String, usize>,
    counts: BTreeMap<String, ClassCounts>,
    /// Tracked classes whose roster has arrived at least once.
    reported: BTreeSet<String>,
    stale: BTreeSet<String>,
    grand_total: usize,
    next_generation: u64,
    update_tx: mpsc::Sender<CountUpdate>,
    update_rx: mpsc::Receiver<CountUpdate>,
}

impl<S: DocumentStore> AttendanceAggregator<S> {
    pub fn new(school_id: &str, subscriptions: SubscriptionManager<S>) -> Self {
        Self::with_buffer(school_id, subscriptions, DEFAULT_UPDATE_BUFFER)
    }

    pub fn with_buffer(school_id: &str, subscriptions: SubscriptionManager<S>, buffer: usize) -> Self {
        let (update_tx, update_rx) = mpsc::channel(buffer.max(1));
        Self {
            school_id: school_id.to_string(),
            subscriptions,
            tracked: HashMap::new(),
            totals: HashMap::new(),
            counts: BTreeMap::new(),
            reported: BTreeSet::new(),
            stale: BTreeSet::new(),
            grand_total: 0,
            next_generation: 0,
            update_tx,
            update_rx,
        }
    }

    pub fn school_id(&self) -> &str {
        &self.school_id
    }

    /// Start tracking a class.
    ///
    /// Returns `Ok(false)` when the class is already tracked or the id is
    /// empty. The class enters the mapping with zero counts until its first
    /// roster arrives.
    pub fn track(&mut self, class_id: &str) -> Result<bool, RollcallError> {
        if self.tracked.contains_key(class_id) {
            return Ok(false);
        }
        let Some(roster) = self.subscriptions.subscribe(&self.school_id, class_id)? else {
            return Ok(false);
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let forwarder = tokio::spawn(forward_counts(
            class_id.to_string(),
            generation,
            roster,
            self.update_tx.clone(),
        ));
        self.tracked.insert(
            class_id.to_string(),
            TrackedClass {
                generation,
                forwarder,
            },
        );
        self.totals.insert(class_id.to_string(), 0);
        self.counts.insert(class_id.to_string(), ClassCounts::default());
        self.recompute();

        info!(school_id = %self.school_id, class_id, generation, "Tracking class");
        Ok(true)
    }

    /// Stop tracking a class. Updates it already queued are discarded.
    pub fn untrack(&mut self, class_id: &str) -> bool {
        if self.tracked.remove(class_id).is_none() {
            return false;
        }
        self.totals.remove(class_id);
        self.counts.remove(class_id);
        self.reported.remove(class_id);
        self.stale.remove(class_id);
        self.recompute();

        info!(school_id = %self.school_id, class_id, "Stopped tracking class");
        true
    }

    pub fn is_tracked(&self, class_id: &str) -> bool {
        self.tracked.contains_key(class_id)
    }

    pub fn tracked_classes(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }

    /// True once every tracked class has reported its roster at least once.
    pub fn is_settled(&self) -> bool {
        self.reported.len() == self.tracked.len()
    }

    /// Wait for the next count update and apply it.
    ///
    /// Pends until some tracked class emits; discarded updates from
    /// untracked classes are skipped.
    pub async fn next_update(&mut self) -> Option<SchoolTotals> {
        while let Some(update) = self.update_rx.recv().await {
            if self.apply(update) {
                return Some(self.totals());
            }
        }
        None
    }

    /// Apply every update already queued without waiting.
    /// Returns how many were applied.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.update_rx.try_recv() {
            if self.apply(update) {
                applied += 1;
            }
        }
        applied
    }

    pub fn class_counts(&self, class_id: &str) -> Option<ClassCounts> {
        self.counts.get(class_id).copied()
    }

    pub fn grand_total(&self) -> usize {
        self.grand_total
    }

    pub fn totals(&self) -> SchoolTotals {
        SchoolTotals {
            classes: self.counts.clone(),
            grand_total: self.grand_total,
            stale: self.stale.clone(),
        }
    }

    fn apply(&mut self, update: CountUpdate) -> bool {
        let current = self.tracked.get(&update.class_id).map(|t| t.generation);
        if current != Some(update.generation) {
            debug!(
                class_id = %update.class_id,
                generation = update.generation,
                "Dropping update for class no longer tracked"
            );
            return false;
        }

        if update.error.is_some() {
            self.stale.insert(update.class_id.clone());
        } else {
            self.stale.remove(&update.class_id);
        }
        if update.loaded {
            self.reported.insert(update.class_id.clone());
        }
        self.totals
            .insert(update.class_id.clone(), update.counts.total);
        self.counts.insert(update.class_id, update.counts);
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        self.grand_total = compute_grand_total(&self.totals);
        debug!(
            classes = self.totals.len(),
            grand_total = self.grand_total,
            "Grand total recomputed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use crate::store::{CollectionPath, DocumentPath, DocumentStore, Fields, MemoryStore};

    const WAIT: Duration = Duration::from_secs(2);

    fn seed_class(store: &MemoryStore, class_id: &str, size: usize) {
        for i in 0..size {
            let fields: Fields = serde_json::from_value(json!({ "name": format!("Student {}", i) })).unwrap();
            store.insert(
                &DocumentPath::student("sch", class_id, &format!("{}-s{}", class_id, i)).unwrap(),
                fields,
            );
        }
    }

    fn aggregator(store: &Arc<MemoryStore>) -> AttendanceAggregator<MemoryStore> {
        AttendanceAggregator::new("sch", SubscriptionManager::new(Arc::clone(store)))
    }

    /// Apply updates until `done` holds for the current totals.
    async fn settle(
        agg: &mut AttendanceAggregator<MemoryStore>,
        done: impl Fn(&SchoolTotals) -> bool,
    ) -> SchoolTotals {
        let mut totals = agg.totals();
        while !done(&totals) {
            totals = timeout(WAIT, agg.next_update()).await.unwrap().unwrap();
        }
        totals
    }

    #[tokio::test]
    async fn test_grand_total_follows_tracked_classes() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 3);
        seed_class(&store, "c", 5);
        let mut agg = aggregator(&store);

        assert!(agg.track("a").unwrap());
        assert!(agg.track("b").unwrap());
        assert!(!agg.is_settled());
        let totals = settle(&mut agg, |t| t.grand_total == 3).await;
        assert_eq!(totals.classes["b"].total, 0);
        while !agg.is_settled() {
            timeout(WAIT, agg.next_update()).await.unwrap().unwrap();
        }
        assert_eq!(agg.grand_total(), 3);

        assert!(agg.track("c").unwrap());
        let totals = settle(&mut agg, |t| t.grand_total == 8).await;
        assert_eq!(totals.classes.len(), 3);
    }

    #[tokio::test]
    async fn test_tracking_order_does_not_matter() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 2);
        seed_class(&store, "b", 4);
        seed_class(&store, "c", 1);

        let mut forward = aggregator(&store);
        for id in ["a", "b", "c"] {
            forward.track(id).unwrap();
        }
        let mut reverse = aggregator(&store);
        for id in ["c", "b", "a"] {
            reverse.track(id).unwrap();
        }

        let f = settle(&mut forward, |t| t.grand_total == 7).await;
        let r = settle(&mut reverse, |t| t.grand_total == 7).await;
        assert_eq!(f.classes, r.classes);
    }

    #[tokio::test]
    async fn test_counts_follow_status_writes() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 2);
        let mut agg = aggregator(&store);
        agg.track("a").unwrap();
        settle(&mut agg, |t| t.grand_total == 2).await;

        let mut fields = Fields::new();
        fields.insert("status".to_string(), json!("present"));
        store
            .update(&DocumentPath::student("sch", "a", "a-s0").unwrap(), fields)
            .await
            .unwrap();

        let totals = settle(&mut agg, |t| t.classes["a"].present == 1).await;
        assert_eq!(
            totals.classes["a"],
            ClassCounts {
                present: 1,
                absent: 0,
                total: 2
            }
        );
        assert_eq!(totals.grand_total, 2);
    }

    #[tokio::test]
    async fn test_track_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut agg = AttendanceAggregator::new("sch", manager.clone());

        assert!(agg.track("a").unwrap());
        assert!(!agg.track("a").unwrap());
        assert!(!agg.track("").unwrap());
        assert_eq!(manager.subscriber_count("sch", "a"), 1);
        assert_eq!(agg.tracked_classes(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_untrack_removes_class_and_drops_late_updates() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 3);
        seed_class(&store, "b", 2);
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let mut agg = AttendanceAggregator::new("sch", manager.clone());
        agg.track("a").unwrap();
        agg.track("b").unwrap();
        settle(&mut agg, |t| t.grand_total == 5).await;

        let old_generation = agg.tracked["a"].generation;
        assert!(agg.untrack("a"));
        assert!(!agg.untrack("a"));
        assert_eq!(agg.grand_total(), 2);

        // An emission queued before the untrack must not resurrect the class.
        agg.update_tx
            .send(CountUpdate {
                class_id: "a".to_string(),
                generation: old_generation,
                counts: ClassCounts {
                    present: 0,
                    absent: 0,
                    total: 3,
                },
                loaded: true,
                error: None,
            })
            .await
            .unwrap();
        agg.apply_pending();
        assert_eq!(agg.grand_total(), 2);
        assert!(agg.class_counts("a").is_none());

        // The roster stream is released once the forwarder is gone.
        timeout(WAIT, async {
            while manager.subscriber_count("sch", "a") > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_retrack_ignores_previous_generation() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 1);
        let mut agg = aggregator(&store);
        agg.track("a").unwrap();
        let first = agg.tracked["a"].generation;
        agg.untrack("a");
        agg.track("a").unwrap();
        assert_ne!(agg.tracked["a"].generation, first);

        agg.update_tx
            .send(CountUpdate {
                class_id: "a".to_string(),
                generation: first,
                counts: ClassCounts {
                    present: 0,
                    absent: 0,
                    total: 40,
                },
                loaded: true,
                error: None,
            })
            .await
            .unwrap();
        let totals = settle(&mut agg, |t| t.grand_total == 1).await;
        assert_eq!(totals.classes["a"].total, 1);
        agg.apply_pending();
        assert_eq!(agg.grand_total(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_marks_class_stale_and_keeps_counts() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 4);
        let mut agg = aggregator(&store);
        agg.track("a").unwrap();
        settle(&mut agg, |t| t.grand_total == 4).await;

        store.break_subscriptions(&CollectionPath::students("sch", "a").unwrap(), "network down");
        let totals = settle(&mut agg, |t| t.stale.contains("a")).await;
        assert_eq!(totals.grand_total, 4);

        seed_class(&store, "a", 5);
        let totals = settle(&mut agg, |t| t.grand_total == 5).await;
        assert!(totals.stale.is_empty());
    }

    #[tokio::test]
    async fn test_error_before_first_roster_does_not_settle() {
        let store = Arc::new(MemoryStore::new());
        seed_class(&store, "a", 2);
        let mut agg = aggregator(&store);
        agg.track("a").unwrap();
        let generation = agg.tracked["a"].generation;

        agg.update_tx
            .send(CountUpdate {
                class_id: "a".to_string(),
                generation,
                counts: ClassCounts::default(),
                loaded: false,
                error: Some("unavailable".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(agg.apply_pending(), 1);
        assert!(agg.totals().stale.contains("a"));
        assert!(!agg.is_settled());

        while !agg.is_settled() {
            timeout(WAIT, agg.next_update()).await.unwrap().unwrap();
        }
        assert_eq!(agg.grand_total(), 2);
        assert!(agg.totals().stale.is_empty());
    }
}
