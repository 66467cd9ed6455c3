use std::path::{Path, PathBuf};
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use timerscan_proto::proto::ResultRecord;

use crate::rect::BoundingBox;
use crate::video::frame::{FrameIndex, RawFrame};

const TEXT_SCALE: f32 = 20.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_LINE_HEIGHT: i32 = 22;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Writes intermediate bitmaps of the overlay search and preprocessing.
///
/// Cheap to clone; a disabled recorder does nothing. Write failures are
/// logged and otherwise ignored.
#[derive(Clone, Default)]
pub struct StageRecorder {
    dir: Option<Arc<PathBuf>>,
}

impl StageRecorder {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir: Some(Arc::new(dir)),
        }
    }

    pub fn record(&self, frame_index: FrameIndex, stage: &str, image: &GrayImage) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(format!("frame_{frame_index:08}_{stage}.png"));
        match image.save(&path) {
            Ok(()) => debug!(?path, "saved stage image"),
            Err(e) => warn!(?path, error = %e, "failed to save stage image"),
        }
    }
}

/// Renders a frame with the located overlay box and the decoded reading.
pub struct DebugRenderer {
    font: Option<FontVec>,
}

impl DebugRenderer {
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(Self::load_font);
        Self { font }
    }

    pub fn save_frame(
        &self,
        frame: &RawFrame,
        bbox: BoundingBox,
        record: &ResultRecord,
        dir: &Path,
    ) -> Result<()> {
        let mut img = frame.image.clone();

        if !bbox.is_empty() {
            let rect = Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.w, bbox.h);
            draw_hollow_rect_mut(&mut img, rect, BOX_COLOR);
        }

        self.draw_text_overlay(&mut img, frame, record);

        let path = dir.join(format!("frame_{:08}.png", frame.frame_index));
        img.save(&path)
            .with_context(|| format!("failed to save debug frame to {}", path.display()))?;

        debug!(?path, "saved debug frame");
        Ok(())
    }

    fn draw_text_overlay(&self, img: &mut RgbImage, frame: &RawFrame, record: &ResultRecord) {
        let Some(font) = &self.font else { return };
        let scale = PxScale::from(TEXT_SCALE);
        let x = 10;
        let mut y = 10;

        let lines = [
            format!("F:{}", frame.frame_index),
            format!("AT:{}", record.offset),
            if record.text.is_empty() {
                "TS:--".to_string()
            } else {
                format!("TS:{} ({}s)", record.text, record.timestamp_seconds)
            },
        ];
        for line in &lines {
            draw_text_mut(img, TEXT_COLOR, x, y, scale, font, line);
            y += TEXT_LINE_HEIGHT;
        }
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(?path, error = %e, "failed to read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(?path, "loaded debug font");
                Some(font)
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_writes_named_stage_files() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = StageRecorder::new(dir.path().to_path_buf());
        recorder.record(42, "mask", &GrayImage::new(4, 4));
        assert!(dir.path().join("frame_00000042_mask.png").exists());
    }

    #[test]
    fn disabled_recorder_is_silent() {
        let recorder = StageRecorder::disabled();
        recorder.record(1, "mask", &GrayImage::new(4, 4));
        assert!(!std::path::Path::new("frame_00000001_mask.png").exists());
    }

    #[test]
    fn renderer_saves_annotated_frame_without_font() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = DebugRenderer::new(None);
        let frame = RawFrame {
            image: RgbImage::new(64, 32),
            frame_index: 90,
            offset_seconds: 3.0,
        };
        let record = ResultRecord {
            frame_index: 90,
            offset: "000:00:03".into(),
            timestamp_seconds: 3723,
            text: "1:02:03".into(),
            raw_text: "01:02:03\n".into(),
        };
        renderer
            .save_frame(&frame, BoundingBox::new(2, 2, 20, 10), &record, dir.path())
            .unwrap();

        let saved = image::open(dir.path().join("frame_00000090.png")).unwrap().into_rgb8();
        assert_eq!(*saved.get_pixel(2, 2), BOX_COLOR);
    }
}
