use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Default descriptor length produced by the dlib-style face encoder.
pub const DEFAULT_DESCRIPTOR_DIM: usize = 128;

/// Face descriptor vector.
///
/// Serialized as a plain array of numbers so persisted records stay readable
/// by any storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Callers are expected to have checked that both lengths agree; extra
    /// components on either side are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// An enrolled person together with every descriptor captured at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledPerson {
    pub id: String,
    pub display_name: String,
    pub descriptors: Vec<Descriptor>,
}

/// Listing view of an enrolled person, without the vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSummary {
    pub id: String,
    pub display_name: String,
    pub descriptor_count: usize,
}

impl From<&EnrolledPerson> for PersonSummary {
    fn from(person: &EnrolledPerson) -> Self {
        Self {
            id: person.id.clone(),
            display_name: person.display_name.clone(),
            descriptor_count: person.descriptors.len(),
        }
    }
}

/// Positive identification of a query descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub person_id: String,
    pub display_name: String,
    /// `1 - distance`, in [0, 1]. Higher = closer.
    pub confidence: f32,
    pub distance: f32,
}

/// First sighting of a person within one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub person_id: String,
    pub display_name: String,
    pub first_seen: DateTime<Local>,
}

/// One line of a persisted attendance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub person_id: String,
    pub display_name: String,
    pub timestamp: DateTime<Local>,
}

impl From<AttendanceEvent> for AttendanceEntry {
    fn from(event: AttendanceEvent) -> Self {
        Self {
            person_id: event.person_id,
            display_name: event.display_name,
            timestamp: event.first_seen,
        }
    }
}

/// A completed session roster, as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub record_id: String,
    pub activity: String,
    /// Calendar date of the session, `YYYY-MM-DD`.
    pub date: String,
    pub entries: Vec<AttendanceEntry>,
}
