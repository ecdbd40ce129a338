//! Attendance ledger: completed session rosters, one record per session.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::storage::{Collection, Document, Storage};
use crate::types::{AttendanceEntry, AttendanceRecord};

/// Optional predicates for [`AttendanceLedger::filter`].
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Exact activity match.
    pub activity: Option<String>,
    /// Substring of the `YYYY-MM-DD` date.
    pub date: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        let activity_ok = self
            .activity
            .as_deref()
            .map_or(true, |a| record.activity == a);
        let date_ok = self
            .date
            .as_deref()
            .map_or(true, |d| record.date.contains(d));
        activity_ok && date_ok
    }
}

/// Append-only store of attendance records.
pub struct AttendanceLedger {
    storage: Arc<dyn Storage>,
    records: Mutex<Vec<AttendanceRecord>>,
}

impl AttendanceLedger {
    /// Load persisted records. Unreadable records are logged and skipped.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let loaded = storage.load(Collection::AttendanceRecords).await?;
        for bad in &loaded.unreadable {
            tracing::warn!(key = %bad.key, reason = %bad.reason, "skipping unreadable attendance record");
        }
        let mut records = Vec::with_capacity(loaded.documents.len());
        for doc in loaded.documents {
            match serde_json::from_value::<AttendanceRecord>(doc.body) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %doc.key, error = %e, "skipping unreadable attendance record"),
            }
        }
        tracing::info!(count = records.len(), backend = storage.backend(), "loaded attendance records");

        Ok(Self {
            storage,
            records: Mutex::new(records),
        })
    }

    /// Persist a roster for `activity`, stamped with the current local time.
    pub async fn record(&self, activity: &str, entries: Vec<AttendanceEntry>) -> Result<AttendanceRecord> {
        self.record_at(activity, entries, Local::now()).await
    }

    /// Persist a roster for `activity` created at `created`.
    pub async fn record_at(
        &self,
        activity: &str,
        entries: Vec<AttendanceEntry>,
        created: DateTime<Local>,
    ) -> Result<AttendanceRecord> {
        if activity.trim().is_empty() {
            return Err(CoreError::Validation("activity must not be empty".into()));
        }
        if entries.is_empty() {
            return Err(CoreError::Validation(format!(
                "attendance record for {activity} has no entries"
            )));
        }

        let record = AttendanceRecord {
            record_id: record_id(activity, created),
            activity: activity.to_string(),
            date: created.format("%Y-%m-%d").to_string(),
            entries,
        };
        let doc = Document {
            key: record.record_id.clone(),
            body: serde_json::to_value(&record)?,
        };

        let mut records = self.records.lock().await;
        self.storage.put(Collection::AttendanceRecords, &doc).await?;
        records.push(record.clone());

        tracing::info!(
            record_id = %record.record_id,
            activity = %record.activity,
            entries = record.entries.len(),
            "attendance recorded"
        );
        Ok(record)
    }

    /// Every record, in the order they were written.
    pub async fn list_all(&self) -> Vec<AttendanceRecord> {
        self.records.lock().await.clone()
    }

    pub async fn filter(&self, filter: &RecordFilter) -> Vec<AttendanceRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Drop every record, persisted and in memory.
    pub async fn clear(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        self.storage.clear(Collection::AttendanceRecords).await?;
        let removed = records.len();
        records.clear();
        tracing::info!(removed, "attendance ledger cleared");
        Ok(removed)
    }
}

/// `{activity}_{YYYYMMDD}_{HHMMSS}_{8 hex}`.
fn record_id(activity: &str, created: DateTime<Local>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{activity}_{}_{}", created.format("%Y%m%d_%H%M%S"), &suffix[..8])
}
