pub mod box_cache;
pub mod locator;
pub mod preprocess;
pub mod recognizer;
pub mod timestamp;

use image::GrayImage;
use thiserror::Error;

use crate::rect::BoundingBox;
use crate::video::frame::RawFrame;

/// Recoverable per-frame failures. Each one triggers a box recomputation
/// inside the frame processor's retry loop and never escapes it.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid region: {0}")]
    RegionInvalid(String),
    #[error("expected exactly one timestamp in {cleaned:?}, found {matches}")]
    TimeStringParsing { cleaned: String, matches: usize },
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Finds the timer overlay in a frame.
///
/// Must be deterministic for a fixed frame and configuration. Returns
/// `BoundingBox::ZERO` when no candidate qualifies.
pub trait RegionLocator: Send + Sync {
    fn locate(&self, frame: &RawFrame) -> BoundingBox;
}

/// Reads text from a preprocessed, single-channel bitmap.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, bitmap: &GrayImage) -> Result<String, FrameError>;
}
