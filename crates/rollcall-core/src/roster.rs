//! Per-session deduplicated roster.

use std::collections::HashSet;

use chrono::{DateTime, Local};

use crate::types::{AttendanceEntry, AttendanceEvent, MatchResult};

/// Identities recognized during one session, in first-seen order.
///
/// Holds at most one event per person no matter how many samples match them.
#[derive(Debug, Clone, Default)]
pub struct SessionRoster {
    events: Vec<AttendanceEvent>,
    seen: HashSet<String>,
}

impl SessionRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `matched` as present at `now` unless already on the roster.
    ///
    /// Returns `true` when a new event was appended.
    pub fn admit(&mut self, matched: &MatchResult, now: DateTime<Local>) -> bool {
        if !self.seen.insert(matched.person_id.clone()) {
            return false;
        }
        self.events.push(AttendanceEvent {
            person_id: matched.person_id.clone(),
            display_name: matched.display_name.clone(),
            first_seen: now,
        });
        true
    }

    pub fn contains(&self, person_id: &str) -> bool {
        self.seen.contains(person_id)
    }

    pub fn events(&self) -> &[AttendanceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Consume the roster into ledger entries.
    pub fn into_entries(self) -> Vec<AttendanceEntry> {
        self.events.into_iter().map(AttendanceEntry::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn matched(id: &str, name: &str) -> MatchResult {
        MatchResult {
            person_id: id.into(),
            display_name: name.into(),
            confidence: 0.9,
            distance: 0.1,
        }
    }

    #[test]
    fn test_admit_deduplicates_and_keeps_first_seen() {
        let mut roster = SessionRoster::new();
        let t0 = Local::now();

        assert!(roster.admit(&matched("S1", "Alice"), t0));
        assert!(!roster.admit(&matched("S1", "Alice"), t0 + Duration::seconds(1)));
        assert!(!roster.admit(&matched("S1", "Alice"), t0 + Duration::seconds(2)));

        assert_eq!(roster.len(), 1);
        assert_eq!(roster.events()[0].first_seen, t0);
    }

    #[test]
    fn test_admit_preserves_arrival_order() {
        let mut roster = SessionRoster::new();
        let now = Local::now();
        roster.admit(&matched("S2", "Bob"), now);
        roster.admit(&matched("S1", "Alice"), now);
        roster.admit(&matched("S2", "Bob"), now);

        let ids: Vec<_> = roster.events().iter().map(|e| e.person_id.as_str()).collect();
        assert_eq!(ids, ["S2", "S1"]);
        assert!(roster.contains("S1"));
        assert!(!roster.contains("S3"));
    }

    #[test]
    fn test_into_entries_carries_first_seen_as_timestamp() {
        let mut roster = SessionRoster::new();
        let now = Local::now();
        roster.admit(&matched("S1", "Alice"), now);

        let entries = roster.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].person_id, "S1");
        assert_eq!(entries[0].timestamp, now);
    }
}
