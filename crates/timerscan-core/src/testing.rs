//! Test doubles shared by the processor, sampler and scheduler tests.

use std::collections::BTreeMap;
use std::io;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use image::{GrayImage, RgbImage};
use parking_lot::Mutex;

use timerscan_proto::proto::ResultRecord;

use crate::analysis::{FrameError, RegionLocator, TextRecognizer};
use crate::rect::BoundingBox;
use crate::store::{ResultStore, StoreError};
use crate::video::frame::{next_boundary, FrameIndex, RawFrame};
use crate::video::FrameSource;

const SYNTHETIC_WIDTH: u32 = 320;
const SYNTHETIC_HEIGHT: u32 = 180;

/// In-memory stream of blank frames.
pub struct SyntheticSource {
    total: u64,
    fps: f64,
    next: FrameIndex,
    grabbed: Option<FrameIndex>,
    fail_from: Option<FrameIndex>,
    dropped: Range<FrameIndex>,
    boundaries_only: bool,
    retrieved: Arc<AtomicUsize>,
}

impl SyntheticSource {
    pub fn new(total: u64, fps: f64) -> Self {
        Self {
            total,
            fps,
            next: 0,
            grabbed: None,
            fail_from: None,
            dropped: 0..0,
            boundaries_only: false,
            retrieved: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Grabbing `frame_index` or anything after it fails.
    pub fn failing_from(mut self, frame_index: FrameIndex) -> Self {
        self.fail_from = Some(frame_index);
        self
    }

    /// Frames in `frames` are never delivered; grab moves on to the next one.
    pub fn dropping(mut self, frames: Range<FrameIndex>) -> Self {
        self.dropped = frames;
        self
    }

    /// Deliver only per-second boundary frames, like a decoder that selects
    /// them itself.
    pub fn boundaries_only(mut self) -> Self {
        self.boundaries_only = true;
        self
    }

    pub fn retrieve_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.retrieved)
    }
}

impl FrameSource for SyntheticSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> u64 {
        self.total
    }

    fn seek(&mut self, frame_index: FrameIndex) -> Result<()> {
        self.next = frame_index;
        self.grabbed = None;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<FrameIndex>> {
        if self.fail_from.is_some_and(|f| self.next >= f) {
            bail!("synthetic decode failure at frame {}", self.next);
        }
        let mut index = self.next;
        if self.dropped.contains(&index) {
            index = self.dropped.end;
        }
        if self.boundaries_only {
            index = next_boundary(index, self.fps);
        }
        if index >= self.total {
            self.grabbed = None;
            return Ok(None);
        }
        self.next = index + 1;
        self.grabbed = Some(index);
        Ok(Some(index))
    }

    fn retrieve(&mut self) -> Result<RawFrame> {
        let Some(index) = self.grabbed else {
            bail!("retrieve called before grab");
        };
        self.retrieved.fetch_add(1, Ordering::SeqCst);
        Ok(RawFrame::new(
            RgbImage::new(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT),
            index,
            self.fps,
        ))
    }
}

/// Locator driven by a closure, counting how often it is asked.
pub struct CountingLocator {
    pick: Box<dyn Fn(&RawFrame) -> BoundingBox + Send + Sync>,
    calls: AtomicUsize,
}

impl CountingLocator {
    pub fn new(pick: impl Fn(&RawFrame) -> BoundingBox + Send + Sync + 'static) -> Self {
        Self {
            pick: Box::new(pick),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(bbox: BoundingBox) -> Self {
        Self::new(move |_| bbox)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegionLocator for CountingLocator {
    fn locate(&self, frame: &RawFrame) -> BoundingBox {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.pick)(frame)
    }
}

/// Recognizer that reads the same text from every bitmap.
pub struct FixedRecognizer {
    text: String,
}

impl FixedRecognizer {
    pub fn new(text: &str) -> Self {
        Self { text: text.into() }
    }
}

impl TextRecognizer for FixedRecognizer {
    fn recognize(&self, _bitmap: &GrayImage) -> Result<String, FrameError> {
        Ok(self.text.clone())
    }
}

/// Recognizer that plays back a script, one entry per call, repeating the
/// last entry. `None` entries fail with a recognition error.
pub struct ScriptedRecognizer {
    script: Vec<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            script: texts.iter().map(|t| Some(t.to_string())).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: vec![None],
            calls: AtomicUsize::new(0),
        }
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, _bitmap: &GrayImage) -> Result<String, FrameError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self.script.get(n).or(self.script.last()).cloned().flatten();
        entry.ok_or_else(|| FrameError::Recognition("scripted failure".into()))
    }
}

/// Ordered in-memory store that also logs the index of every write.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<FrameIndex, ResultRecord>>,
    writes: Mutex<Vec<FrameIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn get(&self, frame_index: FrameIndex) -> Option<ResultRecord> {
        self.rows.lock().get(&frame_index).cloned()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn write_log(&self) -> Vec<FrameIndex> {
        self.writes.lock().clone()
    }

    pub fn clear_write_log(&self) {
        self.writes.lock().clear();
    }
}

impl ResultStore for MemoryStore {
    fn upsert(&self, record: ResultRecord) -> Result<(), StoreError> {
        self.writes.lock().push(record.frame_index);
        self.rows.lock().insert(record.frame_index, record);
        Ok(())
    }

    fn contains(&self, frame_index: FrameIndex) -> bool {
        self.rows.lock().contains_key(&frame_index)
    }
}

/// Store whose writes fail for selected frame indices.
pub struct FailingStore {
    inner: MemoryStore,
    fails: Box<dyn Fn(FrameIndex) -> bool + Send + Sync>,
}

impl FailingStore {
    pub fn new(fails: impl Fn(FrameIndex) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: MemoryStore::new(),
            fails: Box::new(fails),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl ResultStore for FailingStore {
    fn upsert(&self, record: ResultRecord) -> Result<(), StoreError> {
        if (self.fails)(record.frame_index) {
            return Err(StoreError::Io {
                path: PathBuf::from("failing-store"),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.upsert(record)
    }

    fn contains(&self, frame_index: FrameIndex) -> bool {
        self.inner.contains(frame_index)
    }
}
