use std::sync::Arc;

use anyhow::Result;
use rollcall_core::storage::{self, SqliteStorage};
use rollcall_core::{AttendanceLedger, EnrollmentStore, EuclideanMatcher, Matcher};
use rollcall_hw::{FrameSource, SidecarProvider, SpoolCamera};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod registration;
mod session;

use config::Config;
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use engine::{spawn_engine, OpenCamera};
use session::{SessionState, SessionTracker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Config::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        spool = %cfg.spool_dir.display(),
        db = %cfg.db_path.display(),
        "rollcalld starting"
    );

    let local = SqliteStorage::open(&cfg.db_path).await?;
    let storage = storage::select(local, cfg.remote_url.as_deref(), cfg.remote_timeout()).await;

    let store = Arc::new(EnrollmentStore::open(storage.clone(), cfg.descriptor_dim).await);
    let ledger = Arc::new(AttendanceLedger::open(storage.clone()).await?);
    let matcher: Arc<dyn Matcher> = Arc::new(EuclideanMatcher {
        threshold: cfg.recognition_threshold,
    });

    tokio::fs::create_dir_all(&cfg.spool_dir).await?;
    let spool = cfg.spool_dir.clone();
    let open_camera: OpenCamera =
        Box::new(move || Ok(Box::new(SpoolCamera::open(&spool)?) as Box<dyn FrameSource>));
    let engine = spawn_engine(open_camera, Box::new(SidecarProvider::new(&cfg.spool_dir)))?;

    let tracker = Arc::new(Mutex::new(SessionTracker::new(
        engine.clone(),
        store.clone(),
        ledger.clone(),
        matcher,
        cfg.sample_period(),
    )));

    let service = RollcallService::new(store, ledger, tracker.clone(), engine, storage.backend());
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    let mut tracker = tracker.lock().await;
    if tracker.state() == SessionState::Active || tracker.has_unsaved() {
        match tracker.stop().await {
            Ok(Some(record)) => tracing::info!(record_id = %record.record_id, "open session saved on shutdown"),
            Ok(None) => tracing::info!("open session had no attendance"),
            Err(e) => tracing::error!(error = %e, "failed to save open session on shutdown"),
        }
    }

    Ok(())
}
