//! Frame sources.
//!
//! The capture widget itself lives outside this crate; it drops snapshot
//! images into a spool directory. [`SpoolCamera`] claims that directory for
//! the lifetime of the handle and hands out the newest snapshot per capture.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::frame::{Frame, FrameError};

const LOCK_FILE: &str = ".rollcall.lock";
const SNAPSHOT_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("no new frame since sequence {0}")]
    StaleFrame(u32),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can hand out camera frames one at a time.
///
/// Dropping the source releases the underlying device.
pub trait FrameSource: Send {
    fn capture_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;
}

/// Snapshot spool directory claimed through a lock file.
pub struct SpoolCamera {
    dir: PathBuf,
    lock_path: PathBuf,
    sequence: u32,
    last: Option<(PathBuf, SystemTime)>,
}

impl SpoolCamera {
    /// Claim the spool directory. Fails with `DeviceBusy` when another
    /// handle already holds it.
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        if !dir.is_dir() {
            return Err(CameraError::DeviceNotFound(dir.display().to_string()));
        }

        let lock_path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CameraError::DeviceBusy(dir.display().to_string()));
            }
            Err(e) => return Err(CameraError::Io(e)),
        }

        tracing::info!(spool = %dir.display(), "camera spool claimed");
        Ok(Self {
            dir: dir.to_path_buf(),
            lock_path,
            sequence: 0,
            last: None,
        })
    }

    /// Newest snapshot in the spool by modification time.
    fn newest_snapshot(&self) -> Result<Option<(PathBuf, SystemTime)>, CameraError> {
        let mut newest: Option<(PathBuf, SystemTime)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_snapshot(&path) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(_, t)| modified > *t) {
                newest = Some((path, modified));
            }
        }
        Ok(newest)
    }
}

fn is_snapshot(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SNAPSHOT_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

impl FrameSource for SpoolCamera {
    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (path, modified) = self
            .newest_snapshot()?
            .ok_or_else(|| CameraError::CaptureFailed(format!("no snapshot in {}", self.dir.display())))?;

        if self.last.as_ref() == Some(&(path.clone(), modified)) {
            return Err(CameraError::StaleFrame(self.sequence));
        }

        self.sequence = self.sequence.wrapping_add(1);
        let frame = Frame::load(&path, self.sequence)?;
        tracing::debug!(seq = self.sequence, path = %path.display(), "captured snapshot");
        self.last = Some((path, modified));
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("spool:{}", self.dir.display())
    }
}

impl Drop for SpoolCamera {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::info!(spool = %self.dir.display(), "camera spool released"),
            Err(e) => tracing::warn!(spool = %self.dir.display(), error = %e, "failed to release spool lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_snapshot(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        image::GrayImage::from_pixel(8, 8, image::Luma([value]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_open_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(SpoolCamera::open(&missing), Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        let first = SpoolCamera::open(dir.path()).unwrap();
        assert!(matches!(SpoolCamera::open(dir.path()), Err(CameraError::DeviceBusy(_))));
        drop(first);

        assert!(!dir.path().join(LOCK_FILE).exists());
        assert!(SpoolCamera::open(dir.path()).is_ok());
    }

    #[test]
    fn test_capture_without_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = SpoolCamera::open(dir.path()).unwrap();
        assert!(matches!(cam.capture_frame(), Err(CameraError::CaptureFailed(_))));
    }

    #[test]
    fn test_capture_same_snapshot_twice_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path(), "frame-1.png", 150);
        let mut cam = SpoolCamera::open(dir.path()).unwrap();

        let frame = cam.capture_frame().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.source.as_deref(), Some(path.as_path()));

        assert!(matches!(cam.capture_frame(), Err(CameraError::StaleFrame(1))));
    }

    #[test]
    fn test_non_image_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("frame-1.json"), b"{}").unwrap();
        assert!(!is_snapshot(&dir.path().join("frame-1.json")));
        assert!(is_snapshot(Path::new("a/b/FRAME.JPG")));
    }
}
