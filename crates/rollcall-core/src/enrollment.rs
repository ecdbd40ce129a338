//! Enrollment store: descriptor sets per enrolled person.

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::matcher::Matcher;
use crate::storage::{Collection, Document, Loaded, Storage};
use crate::types::{Descriptor, EnrolledPerson, MatchResult, PersonSummary};

/// Enrolled people, persisted through a [`Storage`] tier.
///
/// Readers work on an immutable snapshot, so an enrollment in progress is
/// never observed half-written. Writes are serialized and reach storage
/// before the in-memory set changes.
pub struct EnrollmentStore {
    storage: Arc<dyn Storage>,
    dimension: usize,
    people: RwLock<Arc<Vec<EnrolledPerson>>>,
    write_lock: Mutex<()>,
}

impl EnrollmentStore {
    /// Load the persisted people.
    ///
    /// Both failure modes start the store empty. When storage cannot be read
    /// the persisted state is left alone. When it reads back corrupt, the
    /// local copy is reset and any remote mirror keeps its copy.
    pub async fn open(storage: Arc<dyn Storage>, dimension: usize) -> Self {
        let people = match storage.load(Collection::EnrolledPeople).await {
            Err(e) => {
                tracing::error!(error = %e, "enrollment storage unreadable; starting with an empty store");
                Vec::new()
            }
            Ok(loaded) => match decode_people(loaded, dimension) {
                Ok(people) => {
                    tracing::info!(count = people.len(), backend = storage.backend(), "loaded enrolled people");
                    people
                }
                Err(reason) => {
                    tracing::warn!(%reason, "enrollment state corrupt; resetting to an empty store");
                    if let Err(e) = storage.reset_local(Collection::EnrolledPeople).await {
                        tracing::warn!(error = %e, "failed to reset persisted enrollment state");
                    }
                    Vec::new()
                }
            },
        };

        Self {
            storage,
            dimension,
            people: RwLock::new(Arc::new(people)),
            write_lock: Mutex::new(()),
        }
    }

    /// Descriptor length every enrollment and query must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or fully replace the person with `id`.
    pub async fn enroll(
        &self,
        id: &str,
        display_name: &str,
        descriptors: Vec<Descriptor>,
    ) -> Result<EnrolledPerson> {
        if id.trim().is_empty() {
            return Err(CoreError::Validation("person id must not be empty".into()));
        }
        if display_name.trim().is_empty() {
            return Err(CoreError::Validation("display name must not be empty".into()));
        }
        if descriptors.is_empty() {
            return Err(CoreError::Validation(format!("no descriptors given for {id}")));
        }
        for (i, d) in descriptors.iter().enumerate() {
            self.check_descriptor(d)
                .map_err(|msg| CoreError::Validation(format!("descriptor {i} of {id}: {msg}")))?;
        }

        let person = EnrolledPerson {
            id: id.to_string(),
            display_name: display_name.to_string(),
            descriptors,
        };
        let doc = Document {
            key: person.id.clone(),
            body: serde_json::to_value(&person)?,
        };

        let _guard = self.write_lock.lock().await;
        self.storage.put(Collection::EnrolledPeople, &doc).await?;

        let mut next = self.snapshot().as_ref().clone();
        match next.iter_mut().find(|p| p.id == person.id) {
            Some(existing) => *existing = person.clone(),
            None => next.push(person.clone()),
        }
        self.replace(next);

        tracing::info!(
            person_id = %person.id,
            descriptors = person.descriptors.len(),
            "enrolled"
        );
        Ok(person)
    }

    /// Remove a person. Returns `false` when nobody had that id.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.snapshot().iter().any(|p| p.id == id) {
            return Ok(false);
        }
        self.storage.delete(Collection::EnrolledPeople, id).await?;

        let next = self
            .snapshot()
            .iter()
            .filter(|p| p.id != id)
            .cloned()
            .collect();
        self.replace(next);

        tracing::info!(person_id = id, "removed enrollment");
        Ok(true)
    }

    /// Every enrolled person, first-enrollment order.
    pub fn lookup_all(&self) -> Arc<Vec<EnrolledPerson>> {
        self.snapshot()
    }

    pub fn find_by_id(&self, id: &str) -> Option<EnrolledPerson> {
        self.snapshot().iter().find(|p| p.id == id).cloned()
    }

    pub fn summaries(&self) -> Vec<PersonSummary> {
        self.snapshot().iter().map(PersonSummary::from).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Identify `query` against the current enrollment snapshot.
    pub fn identify(&self, matcher: &dyn Matcher, query: &Descriptor) -> Result<Option<MatchResult>> {
        self.check_descriptor(query)
            .map_err(|msg| CoreError::Validation(format!("query descriptor: {msg}")))?;
        let gallery = self.snapshot();
        Ok(matcher.compare(query, &gallery))
    }

    fn check_descriptor(&self, d: &Descriptor) -> std::result::Result<(), String> {
        if d.len() != self.dimension {
            return Err(format!("expected {} values, got {}", self.dimension, d.len()));
        }
        if !d.is_finite() {
            return Err("contains non-finite values".into());
        }
        Ok(())
    }

    fn snapshot(&self) -> Arc<Vec<EnrolledPerson>> {
        match self.people.read() {
            Ok(people) => Arc::clone(&*people),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn replace(&self, next: Vec<EnrolledPerson>) {
        let next = Arc::new(next);
        match self.people.write() {
            Ok(mut people) => *people = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

fn decode_people(loaded: Loaded, dimension: usize) -> std::result::Result<Vec<EnrolledPerson>, String> {
    if let Some(bad) = loaded.unreadable.first() {
        return Err(format!("stored person {} is not valid JSON: {}", bad.key, bad.reason));
    }
    let mut people = Vec::with_capacity(loaded.documents.len());
    for doc in loaded.documents {
        let person: EnrolledPerson = serde_json::from_value(doc.body)
            .map_err(|e| format!("stored person {} does not decode: {e}", doc.key))?;
        if person.descriptors.is_empty() || person.descriptors.iter().any(|d| d.len() != dimension) {
            return Err(format!(
                "stored person {} has no descriptors or descriptors of the wrong length",
                person.id
            ));
        }
        people.push(person);
    }
    Ok(people)
}
