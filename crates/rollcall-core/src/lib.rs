//! Rollcall core - live class rosters and attendance aggregation.
//!
//! The engine behind a school attendance dashboard:
//!
//! - `roster`: live per-class student views over a document store
//! - `aggregate`: present/absent/total per class and a school-wide total
//! - `status`: single-student status toggles
//! - `snapshot`: atomic "commit the day's attendance" writes
//! - `history`, `directory`: reading committed records and class listings
//! - `store`: the document store contract plus an in-memory implementation
//! - `config`: application configuration

pub mod aggregate;
pub mod config;
pub mod directory;
pub mod error;
pub mod history;
pub mod models;
pub mod roster;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod utils;

pub use aggregate::{
    compute_class_counts, compute_grand_total, AttendanceAggregator, ClassCounts, SchoolTotals,
};
pub use config::Config;
pub use directory::fetch_classes;
pub use error::RollcallError;
pub use history::{fetch_history, HistoryFilter};
pub use models::{
    normalize_status, AttendanceRecord, AttendanceSnapshot, AttendanceStatus, SchoolClass,
    Student, Teacher,
};
pub use roster::{ClassKey, RosterSnapshot, RosterSubscription, SubscriptionManager};
pub use snapshot::SnapshotCommitter;
pub use status::StatusToggle;
pub use store::{DocumentStore, MemoryStore, StoreError};
