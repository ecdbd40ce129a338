//! Attendance session tracker.
//!
//! `Idle → Active → Idle`. While active, a timer task samples the camera once
//! per period and admits newly recognized people to the roster. Stopping
//! closes the roster, cancels the timer and hands the roster to the ledger.
//! A roster the ledger failed to write is kept until a later stop saves it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use rollcall_core::{
    AttendanceEntry, AttendanceEvent, AttendanceLedger, AttendanceRecord, CoreError, Descriptor,
    EnrollmentStore, MatchResult, Matcher, SessionRoster,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::{EngineError, EngineHandle};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(#[source] EngineError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
}

/// Point-in-time view of the tracker for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub activity: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub samples: u64,
    pub roster: Vec<AttendanceEvent>,
    /// Activity of a stopped session whose record is not yet written.
    pub unsaved: Option<String>,
}

/// Roster shared between the tracker and its sampling task.
///
/// `open` flips to false under the lock when the session stops; samples that
/// complete afterwards are dropped.
#[derive(Default)]
struct SharedRoster {
    roster: SessionRoster,
    open: bool,
    samples: u64,
}

fn lock(shared: &Mutex<SharedRoster>) -> MutexGuard<'_, SharedRoster> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ActiveSession {
    activity: String,
    started_at: DateTime<Local>,
    shared: Arc<Mutex<SharedRoster>>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Roster of a stopped session waiting for a successful ledger write.
struct UnsavedRoster {
    activity: String,
    ended_at: DateTime<Local>,
    entries: Vec<AttendanceEntry>,
}

/// Everything the sampling task needs, owned by the task.
struct Sampler {
    activity: String,
    engine: EngineHandle,
    store: Arc<EnrollmentStore>,
    matcher: Arc<dyn Matcher>,
    shared: Arc<Mutex<SharedRoster>>,
}

pub struct SessionTracker {
    engine: EngineHandle,
    store: Arc<EnrollmentStore>,
    ledger: Arc<AttendanceLedger>,
    matcher: Arc<dyn Matcher>,
    sample_period: Duration,
    active: Option<ActiveSession>,
    unsaved: Option<UnsavedRoster>,
}

impl SessionTracker {
    pub fn new(
        engine: EngineHandle,
        store: Arc<EnrollmentStore>,
        ledger: Arc<AttendanceLedger>,
        matcher: Arc<dyn Matcher>,
        sample_period: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            ledger,
            matcher,
            sample_period,
            active: None,
            unsaved: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    /// Begin taking attendance for `activity`.
    pub async fn start(&mut self, activity: &str) -> Result<(), SessionError> {
        let activity = activity.trim();
        if activity.is_empty() {
            return Err(SessionError::Validation("activity must not be empty".into()));
        }
        if let Some(active) = &self.active {
            return Err(SessionError::InvalidState(format!(
                "a session for {} is already active",
                active.activity
            )));
        }
        if let Some(unsaved) = &self.unsaved {
            return Err(SessionError::InvalidState(format!(
                "attendance for {} is not saved yet; stop again to retry",
                unsaved.activity
            )));
        }

        self.engine
            .acquire()
            .await
            .map_err(SessionError::ProviderUnavailable)?;

        let shared = Arc::new(Mutex::new(SharedRoster {
            open: true,
            ..Default::default()
        }));
        let (cancel, cancel_rx) = watch::channel(false);
        let sampler = Sampler {
            activity: activity.to_string(),
            engine: self.engine.clone(),
            store: Arc::clone(&self.store),
            matcher: Arc::clone(&self.matcher),
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(sampler.run(self.sample_period, cancel_rx));

        tracing::info!(activity, period_ms = self.sample_period.as_millis() as u64, "session started");
        self.active = Some(ActiveSession {
            activity: activity.to_string(),
            started_at: Local::now(),
            shared,
            cancel,
            task,
        });
        Ok(())
    }

    /// End the session and persist its roster.
    ///
    /// Returns the written record, or `None` when nobody was recognized. When
    /// the ledger write fails the tracker is Idle but keeps the roster, and
    /// the next call retries the write instead of failing with
    /// `InvalidState`.
    pub async fn stop(&mut self) -> Result<Option<AttendanceRecord>, SessionError> {
        let Some(active) = self.active.take() else {
            return match self.unsaved.take() {
                Some(unsaved) => self.persist(unsaved).await.map(Some),
                None => Err(SessionError::InvalidState("no session is active".into())),
            };
        };

        let (roster, samples) = {
            let mut shared = lock(&active.shared);
            shared.open = false;
            (std::mem::take(&mut shared.roster), shared.samples)
        };

        let _ = active.cancel.send(true);
        if let Err(e) = active.task.await {
            tracing::warn!(error = %e, "sampling task ended abnormally");
        }
        if let Err(e) = self.engine.release().await {
            tracing::warn!(error = %e, "failed to release camera");
        }

        tracing::info!(
            activity = %active.activity,
            samples,
            present = roster.len(),
            "session stopped"
        );

        if roster.is_empty() {
            return Ok(None);
        }
        let unsaved = UnsavedRoster {
            activity: active.activity,
            ended_at: Local::now(),
            entries: roster.into_entries(),
        };
        self.persist(unsaved).await.map(Some)
    }

    /// True while a stopped session's roster is waiting to be written.
    pub fn has_unsaved(&self) -> bool {
        self.unsaved.is_some()
    }

    async fn persist(&mut self, unsaved: UnsavedRoster) -> Result<AttendanceRecord, SessionError> {
        match self
            .ledger
            .record_at(&unsaved.activity, unsaved.entries.clone(), unsaved.ended_at)
            .await
        {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(
                    activity = %unsaved.activity,
                    entries = unsaved.entries.len(),
                    error = %e,
                    "attendance not saved; kept for retry"
                );
                self.unsaved = Some(unsaved);
                Err(e.into())
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.active {
            None => SessionSnapshot {
                state: SessionState::Idle,
                activity: None,
                started_at: None,
                samples: 0,
                roster: Vec::new(),
                unsaved: self.unsaved.as_ref().map(|u| u.activity.clone()),
            },
            Some(active) => {
                let shared = lock(&active.shared);
                SessionSnapshot {
                    state: SessionState::Active,
                    activity: Some(active.activity.clone()),
                    started_at: Some(active.started_at),
                    samples: shared.samples,
                    roster: shared.roster.events().to_vec(),
                    unsaved: None,
                }
            }
        }
    }

    /// Identify the faces in a single capture, outside any session.
    pub async fn recognize_once(&self) -> Result<Vec<MatchResult>, SessionError> {
        if let Some(active) = &self.active {
            return Err(SessionError::InvalidState(format!(
                "session for {} owns the camera",
                active.activity
            )));
        }

        self.engine
            .acquire()
            .await
            .map_err(SessionError::ProviderUnavailable)?;
        let sampled = self.engine.sample().await;
        if let Err(e) = self.engine.release().await {
            tracing::warn!(error = %e, "failed to release camera");
        }

        let mut matches = Vec::new();
        for detection in sampled? {
            let query = Descriptor::new(detection.descriptor);
            match self.store.identify(self.matcher.as_ref(), &query) {
                Ok(Some(m)) => matches.push(m),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "detection skipped"),
            }
        }
        Ok(matches)
    }
}

impl Sampler {
    async fn run(self, period: Duration, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.changed() => break,
                _ = ticker.tick() => {}
            }
            // Dropping the in-flight sample on cancel discards its result.
            tokio::select! {
                biased;
                _ = cancel.changed() => break,
                _ = self.sample_once() => {}
            }
        }
        tracing::debug!(activity = %self.activity, "sampling stopped");
    }

    async fn sample_once(&self) {
        let detections = match self.engine.sample().await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(activity = %self.activity, error = %e, "sample skipped");
                return;
            }
        };
        let now = Local::now();

        let mut matches = Vec::with_capacity(detections.len());
        for detection in detections {
            let query = Descriptor::new(detection.descriptor);
            match self.store.identify(self.matcher.as_ref(), &query) {
                Ok(Some(m)) => matches.push(m),
                Ok(None) => tracing::debug!(activity = %self.activity, "face not recognized"),
                Err(e) => tracing::warn!(activity = %self.activity, error = %e, "detection skipped"),
            }
        }

        let mut shared = lock(&self.shared);
        if !shared.open {
            tracing::debug!(activity = %self.activity, "late sample discarded");
            return;
        }
        shared.samples += 1;
        for m in &matches {
            if shared.roster.admit(m, now) {
                tracing::info!(
                    activity = %self.activity,
                    person_id = %m.person_id,
                    confidence = m.confidence,
                    "attendance marked"
                );
            }
        }
    }
}
