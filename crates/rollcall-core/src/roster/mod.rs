//! Live class rosters.
//!
//! Each class roster is a live query over
//! `schools/{school}/classes/{class}/students`, surfaced to callers as a
//! `RosterSubscription` that yields the full roster on every change.

pub mod subscription;

pub use subscription::{ClassKey, RosterSnapshot, RosterSubscription, SubscriptionManager};
