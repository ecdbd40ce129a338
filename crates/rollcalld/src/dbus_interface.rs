use std::path::PathBuf;
use std::sync::Arc;

use rollcall_core::{export, AttendanceLedger, CoreError, Descriptor, EnrollmentStore, RecordFilter};
use tokio::sync::Mutex;
use zbus::interface;

use crate::engine::EngineHandle;
use crate::registration;
use crate::session::{SessionError, SessionTracker};

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    store: Arc<EnrollmentStore>,
    ledger: Arc<AttendanceLedger>,
    tracker: Arc<Mutex<SessionTracker>>,
    engine: EngineHandle,
    storage_backend: &'static str,
}

impl RollcallService {
    pub fn new(
        store: Arc<EnrollmentStore>,
        ledger: Arc<AttendanceLedger>,
        tracker: Arc<Mutex<SessionTracker>>,
        engine: EngineHandle,
        storage_backend: &'static str,
    ) -> Self {
        Self {
            store,
            ledger,
            tracker,
            engine,
            storage_backend,
        }
    }
}

fn session_err(e: SessionError) -> zbus::fdo::Error {
    match e {
        SessionError::Validation(msg) => zbus::fdo::Error::InvalidArgs(msg),
        SessionError::Core(CoreError::Validation(msg)) => zbus::fdo::Error::InvalidArgs(msg),
        SessionError::InvalidState(msg) => zbus::fdo::Error::Failed(msg),
        other => zbus::fdo::Error::IOError(other.to_string()),
    }
}

fn core_err(e: CoreError) -> zbus::fdo::Error {
    match e {
        CoreError::Validation(msg) => zbus::fdo::Error::InvalidArgs(msg),
        other => zbus::fdo::Error::IOError(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Empty strings stand in for "no predicate" on the bus.
fn record_filter(activity: &str, date: &str) -> RecordFilter {
    let opt = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
    RecordFilter {
        activity: opt(activity),
        date: opt(date),
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Enroll (or re-enroll) a person from registration photos.
    /// Returns the number of descriptors stored.
    async fn enroll(&self, id: &str, name: &str, images: Vec<String>) -> zbus::fdo::Result<u32> {
        tracing::info!(person_id = id, images = images.len(), "enroll requested");
        let paths = images.into_iter().map(PathBuf::from).collect();
        let person = registration::enroll_from_images(&self.engine, &self.store, id, name, paths)
            .await
            .map_err(session_err)?;
        Ok(person.descriptors.len() as u32)
    }

    /// Enroll (or re-enroll) a person from precomputed descriptors.
    async fn enroll_descriptors(
        &self,
        id: &str,
        name: &str,
        descriptors: Vec<Vec<f64>>,
    ) -> zbus::fdo::Result<u32> {
        tracing::info!(person_id = id, descriptors = descriptors.len(), "enroll_descriptors requested");
        let descriptors = descriptors
            .into_iter()
            .map(|d| Descriptor::new(d.into_iter().map(|v| v as f32).collect()))
            .collect();
        let person = self
            .store
            .enroll(id, name, descriptors)
            .await
            .map_err(core_err)?;
        Ok(person.descriptors.len() as u32)
    }

    /// Remove an enrolled person. Returns false when the id is unknown.
    async fn remove_person(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(person_id = id, "remove_person requested");
        self.store.remove(id).await.map_err(core_err)
    }

    /// JSON array of `{id, display_name, descriptor_count}`.
    async fn list_people(&self) -> zbus::fdo::Result<String> {
        to_json(&self.store.summaries())
    }

    async fn start_session(&self, activity: &str) -> zbus::fdo::Result<()> {
        tracing::info!(activity, "start_session requested");
        self.tracker
            .lock()
            .await
            .start(activity)
            .await
            .map_err(session_err)
    }

    /// Stop the active session. Returns the written record as JSON, or
    /// `null` when nobody was recognized. After a failed save, calling it
    /// again retries the write.
    async fn stop_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop_session requested");
        let record = self
            .tracker
            .lock()
            .await
            .stop()
            .await
            .map_err(session_err)?;
        to_json(&record)
    }

    /// Faces recognized in a single capture, as JSON. Only while idle.
    async fn recognize(&self) -> zbus::fdo::Result<String> {
        let matches = self
            .tracker
            .lock()
            .await
            .recognize_once()
            .await
            .map_err(session_err)?;
        to_json(&matches)
    }

    /// Records matching `activity` (exact) and `date` (substring); empty
    /// strings match everything.
    async fn list_records(&self, activity: &str, date: &str) -> zbus::fdo::Result<String> {
        let records = self.ledger.filter(&record_filter(activity, date)).await;
        to_json(&records)
    }

    /// Same selection as `ListRecords`, flattened to CSV.
    async fn export_records(&self, activity: &str, date: &str) -> zbus::fdo::Result<String> {
        let records = self.ledger.filter(&record_filter(activity, date)).await;
        let mut buf = Vec::new();
        export::write_csv(&records, &mut buf).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Delete every attendance record. Returns how many were removed.
    async fn clear_records(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("clear_records requested");
        let removed = self.ledger.clear().await.map_err(core_err)?;
        Ok(removed as u32)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let session = self.tracker.lock().await.snapshot();
        let engine = self.engine.status().await.ok();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "storage": self.storage_backend,
            "enrolled": self.store.len(),
            "records": self.ledger.list_all().await.len(),
            "camera": engine.as_ref().and_then(|e| e.camera.clone()),
            "provider_loaded": engine.map(|e| e.provider_loaded).unwrap_or(false),
            "session": session,
        })
        .to_string())
    }
}
