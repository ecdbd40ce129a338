//! rollcall-core: identity matching and attendance bookkeeping.
//!
//! Holds enrolled descriptor sets, identifies query descriptors by nearest
//! Euclidean neighbor, deduplicates per-session rosters and persists finished
//! sessions to the attendance ledger through a pluggable storage tier.

pub mod enrollment;
pub mod error;
pub mod export;
pub mod ledger;
pub mod matcher;
pub mod roster;
pub mod storage;
pub mod types;

pub use enrollment::EnrollmentStore;
pub use error::{CoreError, Result};
pub use ledger::{AttendanceLedger, RecordFilter};
pub use matcher::{EuclideanMatcher, Matcher, RECOGNITION_THRESHOLD};
pub use roster::SessionRoster;
pub use storage::{Storage, StorageError};
pub use types::{
    AttendanceEntry, AttendanceEvent, AttendanceRecord, Descriptor, EnrolledPerson, MatchResult,
    PersonSummary, DEFAULT_DESCRIPTOR_DIM,
};
