use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use timerscan_proto::proto::ResultRecord;

use crate::analysis::box_cache::BoxCache;
use crate::analysis::preprocess::prepare_bitmap;
use crate::analysis::timestamp::{parse_timestamp, FAILED_TIMESTAMP};
use crate::analysis::{FrameError, RegionLocator, TextRecognizer};
use crate::config::PreprocessConfig;
use crate::debug::{DebugRenderer, StageRecorder};
use crate::rect::BoundingBox;
use crate::video::frame::{format_offset, RawFrame};

/// Locate + read attempts per frame. A failed attempt discards its box, so the
/// second attempt always runs the locator.
pub const MAX_ATTEMPTS: u32 = 2;

/// Turns one sampled frame into one result record.
///
/// Never fails: a frame whose timer cannot be read produces a record with
/// `FAILED_TIMESTAMP` and empty text.
pub struct FrameProcessor {
    locator: Arc<dyn RegionLocator>,
    recognizer: Arc<dyn TextRecognizer>,
    preprocess: PreprocessConfig,
    box_cache: Option<Arc<BoxCache>>,
    recorder: StageRecorder,
    renderer: Option<(DebugRenderer, PathBuf)>,
}

impl FrameProcessor {
    pub fn new(
        locator: Arc<dyn RegionLocator>,
        recognizer: Arc<dyn TextRecognizer>,
        preprocess: PreprocessConfig,
    ) -> Self {
        Self {
            locator,
            recognizer,
            preprocess,
            box_cache: None,
            recorder: StageRecorder::disabled(),
            renderer: None,
        }
    }

    pub fn with_box_cache(mut self, cache: Arc<BoxCache>) -> Self {
        self.box_cache = Some(cache);
        self
    }

    pub fn with_stage_recorder(mut self, recorder: StageRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_renderer(mut self, renderer: DebugRenderer, dir: PathBuf) -> Self {
        self.renderer = Some((renderer, dir));
        self
    }

    pub fn process(&self, frame: &RawFrame) -> ResultRecord {
        let mut bbox = self
            .box_cache
            .as_ref()
            .and_then(|cache| cache.nearest(frame.frame_index));
        let mut last_raw = String::new();
        let mut outcome = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let current = match bbox.take() {
                Some(cached) => cached,
                None => self.locator.locate(frame),
            };

            match self.read(frame, current, &mut last_raw) {
                Ok(reading) => {
                    outcome = Some((current, reading));
                    break;
                }
                Err(e) => {
                    debug!(
                        frame_index = frame.frame_index,
                        attempt,
                        %current,
                        error = %e,
                        "read attempt failed"
                    );
                }
            }
        }

        let offset = format_offset(frame.offset_seconds);
        let (record, bbox) = match outcome {
            Some((found, (seconds, normalized))) => {
                if let Some(cache) = &self.box_cache {
                    cache.insert(frame.frame_index, found);
                }
                let record = ResultRecord {
                    frame_index: frame.frame_index,
                    offset,
                    timestamp_seconds: seconds,
                    text: normalized,
                    raw_text: last_raw,
                };
                (record, found)
            }
            None => {
                warn!(
                    frame_index = frame.frame_index,
                    raw_text = last_raw.trim(),
                    "timer unreadable after {MAX_ATTEMPTS} attempts"
                );
                let record = ResultRecord {
                    frame_index: frame.frame_index,
                    offset,
                    timestamp_seconds: FAILED_TIMESTAMP,
                    text: String::new(),
                    raw_text: last_raw,
                };
                (record, BoundingBox::ZERO)
            }
        };

        if let Some((renderer, dir)) = &self.renderer {
            if let Err(e) = renderer.save_frame(frame, bbox, &record, dir) {
                warn!(frame_index = frame.frame_index, error = %e, "failed to save debug frame");
            }
        }

        debug!(
            frame_index = record.frame_index,
            timestamp_seconds = record.timestamp_seconds,
            text = %record.text,
            "frame processed"
        );
        record
    }

    /// One attempt: crop, clean up, recognize, parse. `raw` receives the
    /// recognizer output even when parsing fails.
    fn read(
        &self,
        frame: &RawFrame,
        bbox: BoundingBox,
        raw: &mut String,
    ) -> Result<(i64, String), FrameError> {
        if bbox.is_empty() {
            return Err(FrameError::RegionInvalid("no overlay found".into()));
        }
        let bitmap = prepare_bitmap(frame, bbox, &self.preprocess, &self.recorder)?;
        *raw = self.recognizer.recognize(&bitmap)?;
        let timestamp = parse_timestamp(raw)?;
        Ok((timestamp.seconds, timestamp.normalized))
    }
}
