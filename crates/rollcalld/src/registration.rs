//! Enrollment from registration photos.

use std::path::PathBuf;

use rollcall_core::{CoreError, Descriptor, EnrolledPerson, EnrollmentStore};

use crate::engine::EngineHandle;
use crate::session::SessionError;

/// Extract one descriptor per photo and enroll the result.
///
/// Photos with no face or several faces are skipped. Fails with `Validation`
/// when no photo yields a descriptor; the store is left untouched then.
pub async fn enroll_from_images(
    engine: &EngineHandle,
    store: &EnrollmentStore,
    id: &str,
    display_name: &str,
    images: Vec<PathBuf>,
) -> Result<EnrolledPerson, SessionError> {
    if images.is_empty() {
        return Err(SessionError::Validation(format!("no enrollment images given for {id}")));
    }

    let total = images.len();
    let extraction = engine
        .extract(images)
        .await
        .map_err(SessionError::ProviderUnavailable)?;

    for (path, reason) in &extraction.skipped {
        tracing::info!(person_id = id, path = %path.display(), reason = %reason, "enrollment image skipped");
    }
    if extraction.descriptors.is_empty() {
        return Err(SessionError::Validation(format!(
            "no usable face in any of the {total} images for {id}"
        )));
    }

    let descriptors = extraction.descriptors.into_iter().map(Descriptor::new).collect();
    store
        .enroll(id, display_name, descriptors)
        .await
        .map_err(|e| match e {
            CoreError::Validation(msg) => SessionError::Validation(msg),
            other => SessionError::Core(other),
        })
}
