//! rollcall-hw: capture side of the attendance pipeline.
//!
//! Provides the frame type, the snapshot-spool camera and the seam to the
//! external embedding extractor.

pub mod camera;
pub mod frame;
pub mod provider;

pub use camera::{CameraError, FrameSource, SpoolCamera};
pub use frame::Frame;
pub use provider::{Detection, EmbeddingProvider, ProviderError, SidecarProvider};
