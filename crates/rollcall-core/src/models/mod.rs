//! Data models for school entities.
//!
//! - `Student`, `AttendanceStatus`: roster members and their live status
//! - `SchoolClass`, `Teacher`: class metadata (read-only to the engine)
//! - `AttendanceSnapshot`, `AttendanceRecord`: committed attendance history

pub mod attendance;
pub mod class;
pub mod student;

pub use attendance::{AttendanceRecord, AttendanceSnapshot};
pub use class::{SchoolClass, Teacher};
pub use student::{normalize_status, AttendanceStatus, Student};
