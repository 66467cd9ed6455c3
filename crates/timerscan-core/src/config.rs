use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use image::Rgb;

/// Parameters of the color-signature region search.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// RGB color of the overlay background.
    pub color: Rgb<u8>,
    /// Per-channel tolerance around `color`.
    pub color_tolerance: u8,
    /// Largest accepted relative difference between a candidate's traced
    /// perimeter and its bounding rectangle's perimeter.
    pub max_perimeter_deviation: f64,
    /// Smallest accepted candidate area, as a fraction of the frame area.
    pub min_area_fraction: f64,
    /// Radius of the morphological closing applied to the color mask.
    pub closing_radius: u8,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            color: Rgb([21, 12, 67]),
            color_tolerance: 15,
            max_perimeter_deviation: 0.20,
            min_area_fraction: 0.01,
            closing_radius: 1,
        }
    }
}

/// Parameters of the crop-to-bitmap conversion run before recognition.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Intensities at or above this become foreground.
    pub intensity_threshold: u8,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            intensity_threshold: 80,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    /// Reuse the box found for the nearest preceding frame as the first attempt.
    pub cache_boxes: bool,
}

/// Tesseract settings shared by the CLI and in-process recognizers.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Traineddata language code.
    pub language: String,
    /// Directory holding `<language>.traineddata`, or None for tesseract's default.
    pub tessdata: Option<PathBuf>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            language: "eng".into(),
            tessdata: None,
        }
    }
}

/// Diagnostic image output. Never required for correctness.
#[derive(Debug, Clone, Default)]
pub struct DebugConfig {
    /// Directory to write annotated frames, or None to skip.
    pub dir: Option<PathBuf>,
    /// Also write every intermediate stage (mask, binarized, filtered, ...).
    pub record_stages: bool,
    /// TrueType font for the text overlay on annotated frames.
    pub font: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of concurrent sampling tasks, each covering a disjoint sub-range.
    pub sampling_workers: usize,
    /// Pool slots available for processing beyond the sampling tasks.
    pub processing_workers: usize,
    /// Capacity of the sample queue between samplers and processors.
    pub queue_capacity: usize,
    /// How often the scheduler wakes to promote samples and report progress.
    pub poll_interval: Duration,
    /// Fraction of the video to start from.
    pub start_frac: f64,
    /// Fraction of the video to stop at.
    pub end_frac: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sampling_workers: 3,
            processing_workers: 2,
            queue_capacity: 256,
            poll_interval: Duration::from_millis(250),
            start_frac: 0.0,
            end_frac: 1.0,
        }
    }
}

impl SchedulerConfig {
    pub fn max_total_workers(&self) -> usize {
        self.sampling_workers + self.processing_workers
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampling_workers < 1 {
            bail!("sampling_workers must be >= 1, got {}", self.sampling_workers);
        }
        if self.processing_workers < 1 {
            bail!("processing_workers must be >= 1, got {}", self.processing_workers);
        }
        if self.queue_capacity < 1 {
            bail!("queue_capacity must be >= 1, got {}", self.queue_capacity);
        }
        if !(0.0..1.0).contains(&self.start_frac) || self.start_frac >= self.end_frac {
            bail!(
                "expected 0 <= start_frac < end_frac <= 1, got {}..{}",
                self.start_frac,
                self.end_frac
            );
        }
        if self.end_frac > 1.0 {
            bail!("end_frac must be <= 1, got {}", self.end_frac);
        }
        Ok(())
    }
}
