use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::scheduler::CancelToken;
use crate::store::ResultStore;
use crate::video::frame::{first_second, second_boundary, FrameIndex, RawFrame};
use crate::video::FrameSource;

/// Skipped-over gaps longer than this many seconds are crossed by seeking
/// instead of grabbing frame by frame.
const SEEK_AHEAD_SECONDS: f64 = 10.0;

/// Number of samples a range yields: one per second boundary inside it.
pub fn sample_count(range: &Range<FrameIndex>, fps: f64) -> u64 {
    if range.is_empty() {
        return 0;
    }
    first_second(range.end, fps) - first_second(range.start, fps)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub range: Range<FrameIndex>,
    /// Frames sent to the queue.
    pub emitted: u64,
    /// Boundaries already present in the store.
    pub skipped: u64,
    /// Stopped early by a soft stop.
    pub cancelled: bool,
}

/// Reduces one contiguous frame range to one frame per second of video and
/// feeds them to the sample queue.
pub struct Sampler {
    store: Arc<dyn ResultStore>,
    queue: Sender<RawFrame>,
    cancel: CancelToken,
    poll_interval: Duration,
    skip_counter: Option<Arc<AtomicU64>>,
}

enum Delivery {
    Sent,
    Stopped,
}

impl Sampler {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Sender<RawFrame>,
        cancel: CancelToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            cancel,
            poll_interval,
            skip_counter: None,
        }
    }

    /// Also add every skipped boundary to `counter` as it happens, so a
    /// watcher sees skips before the range finishes.
    pub fn with_skip_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.skip_counter = Some(counter);
        self
    }

    /// Sample `range` from `source`.
    ///
    /// Failing to reach the start of the range is an error. Once sampling has
    /// begun, a decode failure ends the range the same way end of stream does.
    pub fn run(&self, source: &mut dyn FrameSource, range: Range<FrameIndex>) -> Result<SamplerReport> {
        let fps = source.frame_rate();
        if !(fps.is_finite() && fps > 0.0) {
            bail!("cannot sample a stream with frame rate {fps}");
        }
        let mut report = SamplerReport {
            range: range.clone(),
            ..Default::default()
        };

        let mut second = first_second(range.start, fps);
        let mut target = second_boundary(second, fps);
        // Frame the next grab starts from; None until the first seek.
        let mut position: Option<FrameIndex> = None;
        let seek_gap = (SEEK_AHEAD_SECONDS * fps).ceil() as u64;

        info!(?range, fps, "sampling range");

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            while target < range.end && self.store.contains(target) {
                report.skipped += 1;
                if let Some(counter) = &self.skip_counter {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                second += 1;
                target = second_boundary(second, fps);
            }
            if target >= range.end {
                break;
            }

            match position {
                None => {
                    source
                        .seek(target)
                        .with_context(|| format!("failed to seek to frame {target}"))?;
                    position = Some(target);
                }
                Some(pos) if target > pos + seek_gap => {
                    if let Err(e) = source.seek(target) {
                        warn!(?range, target, error = %e, "seek failed, ending range");
                        break;
                    }
                    position = Some(target);
                }
                Some(_) => {}
            }

            let index = match source.grab() {
                Ok(Some(index)) => index,
                Ok(None) => {
                    debug!(?range, target, "end of stream");
                    break;
                }
                Err(e) => {
                    warn!(?range, target, error = %e, "decode failed, ending range");
                    break;
                }
            };
            position = Some(index + 1);

            if index < target {
                continue;
            }
            if index > target {
                // The source landed past the boundary; resync to the next one.
                // A stored or out-of-range boundary is left to the checks at
                // the top of the loop, which count the skip.
                second = first_second(index, fps);
                target = second_boundary(second, fps);
                if index != target || target >= range.end || self.store.contains(target) {
                    continue;
                }
            }

            let frame = match source.retrieve() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(?range, target, error = %e, "decode failed, ending range");
                    break;
                }
            };

            match self.deliver(frame) {
                Delivery::Sent => report.emitted += 1,
                Delivery::Stopped => {
                    report.cancelled = true;
                    break;
                }
            }
            second += 1;
            target = second_boundary(second, fps);
        }

        info!(
            ?range,
            emitted = report.emitted,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "range finished"
        );
        Ok(report)
    }

    /// Blocks while the queue is full, checking for a soft stop between waits.
    fn deliver(&self, mut frame: RawFrame) -> Delivery {
        loop {
            match self.queue.send_timeout(frame, self.poll_interval) {
                Ok(()) => return Delivery::Sent,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.is_cancelled() {
                        return Delivery::Stopped;
                    }
                    frame = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Delivery::Stopped,
            }
        }
    }
}
