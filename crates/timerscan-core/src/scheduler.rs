use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::analysis::timestamp::FAILED_TIMESTAMP;
use crate::config::SchedulerConfig;
use crate::pool::{Completion, TaskId, WorkerPool};
use crate::processor::FrameProcessor;
use crate::sampler::{sample_count, Sampler, SamplerReport};
use crate::store::{ResultStore, StoreError};
use crate::video::frame::{FrameIndex, RawFrame};
use crate::video::FrameSourceFactory;

/// Shared soft-stop flag. Once set, no new work is started and the run
/// returns after in-flight tasks finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Status handed to the progress sink on every poll tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub fraction_complete: f64,
    pub active_tasks: usize,
    pub queue_depth: usize,
    /// None until at least one frame has been processed.
    pub estimated_hours_remaining: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Frames that went through the processor, successful or not.
    pub processed: u64,
    /// Samples skipped because the store already had them.
    pub skipped: u64,
    /// Frames recorded with the failure sentinel.
    pub failed_frames: u64,
    /// Frames whose result could not be persisted.
    pub failed_writes: Vec<FrameIndex>,
    /// Sampling ranges that could not be started or whose task panicked.
    pub failed_ranges: Vec<Range<FrameIndex>>,
    pub peak_in_flight: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Frame range covered by a run: `[round(start*total), round(end*total))`.
pub fn scope_range(total_frames: u64, start_frac: f64, end_frac: f64) -> Range<FrameIndex> {
    let at = |frac: f64| ((frac * total_frames as f64).round() as u64).min(total_frames);
    at(start_frac)..at(end_frac)
}

/// Split `scope` into at most `parts` disjoint contiguous ranges of roughly
/// equal size. Interior boundaries are aligned to multiples of the rounded
/// frame rate. Empty ranges are dropped.
pub fn partition(scope: Range<FrameIndex>, parts: usize, fps: f64) -> Vec<Range<FrameIndex>> {
    if scope.is_empty() || parts == 0 {
        return Vec::new();
    }
    let step = (fps.round() as u64).max(1);
    let len = scope.end - scope.start;
    let parts = parts as u64;

    let mut bounds = vec![scope.start];
    for i in 1..parts {
        let raw = scope.start + len * i / parts;
        let aligned = (raw + step / 2) / step * step;
        let prev = bounds.last().copied().unwrap_or(scope.start);
        bounds.push(aligned.clamp(prev, scope.end));
    }
    bounds.push(scope.end);

    bounds
        .windows(2)
        .map(|w| w[0]..w[1])
        .filter(|r| !r.is_empty())
        .collect()
}

enum Task {
    Sampling(Range<FrameIndex>),
    Processing(FrameIndex),
}

enum TaskOutput {
    Sampling(Result<SamplerReport>),
    Processing {
        timestamp_seconds: i64,
        write: Result<(), StoreError>,
    },
}

/// Runs sampling and processing tasks on one fixed-size pool.
///
/// Sampling tasks are submitted up front, one per partition of the scope.
/// Samples they queue are promoted into processing tasks whenever fewer than
/// `max_total_workers` tasks are outstanding.
pub struct PipelineScheduler {
    sources: Arc<dyn FrameSourceFactory>,
    processor: Arc<FrameProcessor>,
    store: Arc<dyn ResultStore>,
    config: SchedulerConfig,
    cancel: CancelToken,
}

struct RunState {
    in_flight: HashMap<TaskId, Task>,
    summary: RunSummary,
    /// Bumped by samplers as they skip stored boundaries.
    skipped: Arc<AtomicU64>,
}

impl PipelineScheduler {
    pub fn new(
        sources: Arc<dyn FrameSourceFactory>,
        processor: Arc<FrameProcessor>,
        store: Arc<dyn ResultStore>,
        config: SchedulerConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            sources,
            processor,
            store,
            config,
            cancel,
        }
    }

    pub fn run(&self, on_progress: &mut dyn FnMut(&Progress)) -> Result<RunSummary> {
        self.config.validate()?;
        let started = Instant::now();

        let (fps, total_frames) = {
            let source = self.sources.open().context("failed to open frame source")?;
            (source.frame_rate(), source.total_frames())
        };
        if !(fps.is_finite() && fps > 0.0) {
            bail!("frame source reports an unusable frame rate ({fps})");
        }
        let scope = scope_range(total_frames, self.config.start_frac, self.config.end_frac);
        let scope_samples = sample_count(&scope, fps);
        let ranges = partition(scope.clone(), self.config.sampling_workers, fps);
        let max_tasks = self.config.max_total_workers();

        info!(
            ?scope,
            fps,
            total_frames,
            scope_samples,
            sampling_tasks = ranges.len(),
            max_tasks,
            "scheduler starting"
        );

        let mut pool =
            WorkerPool::<TaskOutput>::new(max_tasks).context("failed to start worker pool")?;
        let (sample_tx, sample_rx) = bounded::<RawFrame>(self.config.queue_capacity);
        let mut state = RunState {
            in_flight: HashMap::new(),
            summary: RunSummary::default(),
            skipped: Arc::new(AtomicU64::new(0)),
        };

        for range in ranges {
            let sources = Arc::clone(&self.sources);
            let sampler = Sampler::new(
                Arc::clone(&self.store),
                sample_tx.clone(),
                self.cancel.clone(),
                self.config.poll_interval,
            )
            .with_skip_counter(Arc::clone(&state.skipped));
            let task_range = range.clone();
            let id = pool.submit(move || {
                let result = sources
                    .open()
                    .and_then(|mut source| sampler.run(source.as_mut(), task_range));
                TaskOutput::Sampling(result)
            });
            debug!(task_id = id, ?range, "sampling task submitted");
            state.in_flight.insert(id, Task::Sampling(range));
        }
        drop(sample_tx);
        state.summary.peak_in_flight = state.in_flight.len();

        loop {
            match pool.completions().recv_timeout(self.config.poll_interval) {
                Ok(completion) => self.retire(&mut state, completion),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("worker pool shut down unexpectedly")
                }
            }
            while let Ok(completion) = pool.completions().try_recv() {
                self.retire(&mut state, completion);
            }

            let cancelled = self.cancel.is_cancelled();
            if cancelled && !state.summary.interrupted {
                warn!(
                    in_flight = state.in_flight.len(),
                    queued = sample_rx.len(),
                    "soft stop requested, draining in-flight tasks"
                );
                state.summary.interrupted = true;
            }
            if !cancelled {
                self.promote(&mut pool, &mut state, &sample_rx, max_tasks);
            }
            state.summary.peak_in_flight = state.summary.peak_in_flight.max(state.in_flight.len());

            on_progress(&progress(
                state.summary.processed,
                state.skipped.load(Ordering::Relaxed),
                scope_samples,
                state.in_flight.len(),
                sample_rx.len(),
                started.elapsed(),
            ));

            if state.in_flight.is_empty() && (cancelled || sample_rx.is_empty()) {
                break;
            }
        }

        if !sample_rx.is_empty() {
            info!(dropped = sample_rx.len(), "queued samples left for a later run");
        }

        let mut summary = state.summary;
        summary.skipped = state.skipped.load(Ordering::Relaxed);
        summary.elapsed = started.elapsed();
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed_frames = summary.failed_frames,
            failed_writes = summary.failed_writes.len(),
            failed_ranges = summary.failed_ranges.len(),
            peak_in_flight = summary.peak_in_flight,
            interrupted = summary.interrupted,
            elapsed = ?summary.elapsed,
            "scheduler finished"
        );
        Ok(summary)
    }

    fn promote(
        &self,
        pool: &mut WorkerPool<TaskOutput>,
        state: &mut RunState,
        samples: &Receiver<RawFrame>,
        max_tasks: usize,
    ) {
        while state.in_flight.len() < max_tasks {
            let Ok(frame) = samples.try_recv() else {
                break;
            };
            let frame_index = frame.frame_index;
            let processor = Arc::clone(&self.processor);
            let store = Arc::clone(&self.store);
            let id = pool.submit(move || {
                let record = processor.process(&frame);
                let timestamp_seconds = record.timestamp_seconds;
                TaskOutput::Processing {
                    timestamp_seconds,
                    write: store.upsert(record),
                }
            });
            debug!(task_id = id, frame_index, "processing task submitted");
            state.in_flight.insert(id, Task::Processing(frame_index));
        }
    }

    fn retire(&self, state: &mut RunState, completion: Completion<TaskOutput>) {
        let Some(task) = state.in_flight.remove(&completion.id) else {
            warn!(task_id = completion.id, "completion for unknown task");
            return;
        };
        let summary = &mut state.summary;

        match (task, completion.output) {
            (Task::Sampling(_), Ok(TaskOutput::Sampling(Ok(report)))) => {
                debug!(?report, "sampling task finished");
            }
            (Task::Sampling(range), Ok(TaskOutput::Sampling(Err(e)))) => {
                error!(?range, error = %format!("{e:#}"), "sampling task failed");
                summary.failed_ranges.push(range);
            }
            (Task::Sampling(range), Err(_)) => {
                error!(?range, "sampling task panicked");
                summary.failed_ranges.push(range);
            }
            (Task::Processing(frame_index), Ok(TaskOutput::Processing { timestamp_seconds, write })) => {
                summary.processed += 1;
                if timestamp_seconds == FAILED_TIMESTAMP {
                    summary.failed_frames += 1;
                }
                if let Err(e) = write {
                    error!(frame_index, error = %e, "failed to persist result");
                    summary.failed_writes.push(frame_index);
                }
            }
            (Task::Processing(frame_index), Err(_)) => {
                error!(frame_index, "processing task panicked, result not persisted");
                summary.failed_writes.push(frame_index);
            }
            (Task::Sampling(range), Ok(TaskOutput::Processing { .. })) => {
                error!(?range, "sampling task returned a processing result");
                summary.failed_ranges.push(range);
            }
            (Task::Processing(frame_index), Ok(TaskOutput::Sampling(_))) => {
                error!(frame_index, "processing task returned a sampling result");
                summary.failed_writes.push(frame_index);
            }
        }
    }
}

/// Progress over the run's scope, in samples (one per video second).
///
/// The ETA scales elapsed time by the ratio of seconds still to do to the
/// seconds processed so far this run. Seconds skipped from the store took no
/// time, so they count toward completion but not toward that ratio.
fn progress(
    processed: u64,
    skipped: u64,
    scope_samples: u64,
    active_tasks: usize,
    queue_depth: usize,
    elapsed: Duration,
) -> Progress {
    let done = processed + skipped;
    let fraction_complete = if scope_samples == 0 {
        1.0
    } else {
        (done as f64 / scope_samples as f64).min(1.0)
    };

    let secs = elapsed.as_secs_f64();
    let estimated_hours_remaining = (processed > 0 && secs > 0.0).then(|| {
        let remaining = scope_samples.saturating_sub(done) as f64;
        secs * (remaining / processed as f64) / 3600.0
    });

    Progress {
        fraction_complete,
        active_tasks,
        queue_depth,
        estimated_hours_remaining,
    }
}
