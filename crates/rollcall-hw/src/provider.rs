//! Embedding provider seam.
//!
//! Face detection and descriptor extraction are done by an external model.
//! The daemon only sees [`EmbeddingProvider`]: a frame in, zero or more
//! fixed-length descriptors out.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::frame::Frame;

/// File the external extractor creates in the spool once its model is loaded.
pub const READY_MARKER: &str = "extractor.ready";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("embedding provider not loaded")]
    NotLoaded,
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("frame has no source file to pair descriptors with")]
    FrameWithoutSource,
    #[error("no descriptor sidecar for {0}")]
    MissingSidecar(PathBuf),
    #[error("invalid descriptor sidecar {path}: {source}")]
    InvalidSidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub descriptor: Vec<f32>,
    /// Detector confidence, when the extractor reports one.
    pub confidence: Option<f32>,
}

/// Turns frames into face descriptors.
pub trait EmbeddingProvider: Send {
    /// Load the model. Calling it again after success is a no-op.
    fn init(&mut self) -> Result<(), ProviderError>;

    fn is_loaded(&self) -> bool;

    /// Detect every face in `frame`. Requires a successful [`init`](Self::init).
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, ProviderError>;
}

#[derive(Deserialize)]
struct Sidecar {
    faces: Vec<SidecarFace>,
}

#[derive(Deserialize)]
struct SidecarFace {
    descriptor: Vec<f32>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Reads descriptors the external extractor writes next to each snapshot.
///
/// For `frame-0042.png` the extractor writes `frame-0042.json`:
///
/// ```json
/// {"faces": [{"descriptor": [0.01, -0.12, ...], "confidence": 0.99}]}
/// ```
pub struct SidecarProvider {
    ready_marker: PathBuf,
    loaded: bool,
}

impl SidecarProvider {
    pub fn new(spool_dir: &Path) -> Self {
        Self {
            ready_marker: spool_dir.join(READY_MARKER),
            loaded: false,
        }
    }

    fn sidecar_path(source: &Path) -> PathBuf {
        source.with_extension("json")
    }
}

impl EmbeddingProvider for SidecarProvider {
    fn init(&mut self) -> Result<(), ProviderError> {
        if self.loaded {
            return Ok(());
        }
        if !self.ready_marker.exists() {
            return Err(ProviderError::Unavailable(format!(
                "extractor has not signalled readiness ({} missing)",
                self.ready_marker.display()
            )));
        }
        self.loaded = true;
        tracing::info!(marker = %self.ready_marker.display(), "embedding extractor ready");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, ProviderError> {
        if !self.loaded {
            return Err(ProviderError::NotLoaded);
        }
        let source = frame.source.as_deref().ok_or(ProviderError::FrameWithoutSource)?;
        let path = Self::sidecar_path(source);

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::MissingSidecar(path));
            }
            Err(e) => return Err(ProviderError::Io(e)),
        };
        let sidecar: Sidecar = serde_json::from_str(&raw)
            .map_err(|source| ProviderError::InvalidSidecar { path: path.clone(), source })?;

        tracing::debug!(seq = frame.sequence, faces = sidecar.faces.len(), "descriptors read");
        Ok(sidecar
            .faces
            .into_iter()
            .map(|f| Detection {
                descriptor: f.descriptor,
                confidence: f.confidence,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from(path: &Path) -> Frame {
        let mut frame = Frame::from_gray(vec![128; 4], 2, 2, 1).unwrap();
        frame.source = Some(path.to_path_buf());
        frame
    }

    #[test]
    fn test_init_requires_ready_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = SidecarProvider::new(dir.path());

        assert!(matches!(provider.init(), Err(ProviderError::Unavailable(_))));
        assert!(!provider.is_loaded());

        std::fs::write(dir.path().join(READY_MARKER), b"").unwrap();
        provider.init().unwrap();
        provider.init().unwrap();
        assert!(provider.is_loaded());
    }

    #[test]
    fn test_detect_before_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = SidecarProvider::new(dir.path());
        let frame = frame_from(&dir.path().join("a.png"));
        assert!(matches!(provider.detect(&frame), Err(ProviderError::NotLoaded)));
    }

    #[test]
    fn test_detect_reads_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(READY_MARKER), b"").unwrap();
        std::fs::write(
            dir.path().join("frame-1.json"),
            r#"{"faces": [{"descriptor": [0.1, 0.2], "confidence": 0.9}, {"descriptor": [0.3, 0.4]}]}"#,
        )
        .unwrap();

        let mut provider = SidecarProvider::new(dir.path());
        provider.init().unwrap();
        let detections = provider.detect(&frame_from(&dir.path().join("frame-1.png"))).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].descriptor, vec![0.1, 0.2]);
        assert_eq!(detections[0].confidence, Some(0.9));
        assert_eq!(detections[1].confidence, None);
    }

    #[test]
    fn test_detect_missing_or_bad_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(READY_MARKER), b"").unwrap();
        std::fs::write(dir.path().join("bad.json"), b"[1, 2").unwrap();

        let mut provider = SidecarProvider::new(dir.path());
        provider.init().unwrap();

        let missing = provider.detect(&frame_from(&dir.path().join("none.png")));
        assert!(matches!(missing, Err(ProviderError::MissingSidecar(_))));

        let bad = provider.detect(&frame_from(&dir.path().join("bad.png")));
        assert!(matches!(bad, Err(ProviderError::InvalidSidecar { .. })));
    }

    #[test]
    fn test_detect_needs_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(READY_MARKER), b"").unwrap();
        let mut provider = SidecarProvider::new(dir.path());
        provider.init().unwrap();

        let frame = Frame::from_gray(vec![128; 4], 2, 2, 1).unwrap();
        assert!(matches!(provider.detect(&frame), Err(ProviderError::FrameWithoutSource)));
    }
}
