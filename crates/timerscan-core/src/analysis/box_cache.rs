use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::rect::BoundingBox;
use crate::video::frame::FrameIndex;

/// Boxes that produced a successful read, keyed by the frame they were found in.
///
/// A lookup returns the box of the nearest frame at or before the target, so
/// processing tasks that run out of order still start from a nearby position.
#[derive(Default)]
pub struct BoxCache {
    boxes: Mutex<BTreeMap<FrameIndex, BoundingBox>>,
}

impl BoxCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Box for the greatest cached frame index `<= frame_index`.
    pub fn nearest(&self, frame_index: FrameIndex) -> Option<BoundingBox> {
        self.boxes
            .lock()
            .range(..=frame_index)
            .next_back()
            .map(|(_, b)| *b)
    }

    pub fn insert(&self, frame_index: FrameIndex, bbox: BoundingBox) {
        if !bbox.is_empty() {
            self.boxes.lock().insert(frame_index, bbox);
        }
    }
}
