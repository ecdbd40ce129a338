//! Flat tabular view of attendance records for reporting.

use std::io::Write;

use serde::Serialize;

use crate::types::AttendanceRecord;

/// One row per entry per record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Activity")]
    pub activity: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "PersonId")]
    pub person_id: String,
    #[serde(rename = "PersonName")]
    pub person_name: String,
    /// Local wall-clock time of first sighting, `HH:MM:SS`.
    #[serde(rename = "Time")]
    pub time: String,
}

pub fn rows(records: &[AttendanceRecord]) -> Vec<ExportRow> {
    records
        .iter()
        .flat_map(|record| {
            record.entries.iter().map(move |entry| ExportRow {
                activity: record.activity.clone(),
                date: record.date.clone(),
                person_id: entry.person_id.clone(),
                person_name: entry.display_name.clone(),
                time: entry.timestamp.format("%H:%M:%S").to_string(),
            })
        })
        .collect()
}

/// Write `records` as CSV with a header row.
pub fn write_csv<W: Write>(records: &[AttendanceRecord], writer: W) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    let rows = rows(records);
    if rows.is_empty() {
        out.write_record(["Activity", "Date", "PersonId", "PersonName", "Time"])?;
    }
    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;
    Ok(())
}
