//! Frame type and image helpers: snapshot decoding and dark detection.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
    /// Snapshot file this frame was decoded from, if any.
    pub source: Option<PathBuf>,
}

impl Frame {
    /// Wrap raw grayscale pixels.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
            source: None,
        })
    }

    /// Decode an image file (PNG, JPEG, BMP, ...) into a grayscale frame.
    pub fn load(path: &Path, sequence: u32) -> Result<Self, FrameError> {
        let img = image::open(path).map_err(|source| FrameError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let gray = img.to_luma8();
        let (width, height) = gray.dimensions();
        let mut frame = Self::from_gray(gray.into_raw(), width, height, sequence)?;
        frame.source = Some(path.to_path_buf());
        Ok(frame)
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Check if a frame is dark: true if more than `threshold_pct` of pixels
/// fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_from_gray_checks_length() {
        assert!(Frame::from_gray(vec![0; 5], 2, 2, 0).is_err());
        let frame = Frame::from_gray(vec![200; 4], 2, 2, 7).unwrap();
        assert_eq!(frame.sequence, 7);
        assert!(!frame.is_dark);
        assert_eq!(frame.avg_brightness(), 200.0);
    }

    #[test]
    fn test_load_png_to_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        image::RgbImage::from_pixel(4, 3, image::Rgb([120, 120, 120]))
            .save(&path)
            .unwrap();

        let frame = Frame::load(&path, 1).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 12);
        assert_eq!(frame.source.as_deref(), Some(path.as_path()));
        assert!(!frame.is_dark);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(Frame::load(&path, 0), Err(FrameError::Decode { .. })));
    }
}
