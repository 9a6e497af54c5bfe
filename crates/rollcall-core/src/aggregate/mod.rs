//! Attendance counting.
//!
//! `compute_class_counts` and `compute_grand_total` are the pure counting
//! rules; `AttendanceAggregator` keeps them live across many classes.

pub mod aggregator;
pub mod counts;

pub use aggregator::{AttendanceAggregator, SchoolTotals, DEFAULT_UPDATE_BUFFER};
pub use counts::{compute_class_counts, compute_grand_total, ClassCounts};
