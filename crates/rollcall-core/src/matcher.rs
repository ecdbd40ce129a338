//! Nearest-neighbor identification of query descriptors.

use crate::types::{Descriptor, EnrolledPerson, MatchResult};

/// Maximum Euclidean distance accepted as the same person.
pub const RECOGNITION_THRESHOLD: f32 = 0.6;

/// Strategy for finding the enrolled person closest to a query descriptor.
///
/// Implementations receive a consistent snapshot of the gallery and never see
/// a half-written enrollment. Dimension checks happen before `compare` is
/// called (see [`EnrollmentStore::identify`](crate::EnrollmentStore::identify)).
pub trait Matcher: Send + Sync {
    fn compare(&self, query: &Descriptor, gallery: &[EnrolledPerson]) -> Option<MatchResult>;
}

/// Exhaustive scan over every stored descriptor of every person.
///
/// O(people × descriptors). On exactly equal distances the person seen first
/// in gallery order wins.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: RECOGNITION_THRESHOLD,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Descriptor, gallery: &[EnrolledPerson]) -> Option<MatchResult> {
        let mut best_distance = f32::INFINITY;
        let mut best: Option<&EnrolledPerson> = None;

        for person in gallery {
            for descriptor in &person.descriptors {
                let distance = query.euclidean_distance(descriptor);
                if distance < best_distance {
                    best_distance = distance;
                    best = Some(person);
                }
            }
        }

        let person = best?;
        if best_distance > self.threshold {
            tracing::trace!(
                closest = %person.id,
                distance = best_distance,
                "closest candidate above threshold"
            );
            return None;
        }

        Some(MatchResult {
            person_id: person.id.clone(),
            display_name: person.display_name.clone(),
            confidence: (1.0 - best_distance).clamp(0.0, 1.0),
            distance: best_distance,
        })
    }
}
