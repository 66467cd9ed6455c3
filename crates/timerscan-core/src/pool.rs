use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, error};

pub type TaskId = u64;

/// Result of one submitted task. `output` is `Err` if the task panicked.
pub struct Completion<T> {
    pub id: TaskId,
    pub output: thread::Result<T>,
}

/// Fixed-size rayon pool running submitted closures.
///
/// Completions are delivered on a channel the owner polls. The pool does not
/// bound its job queue; callers cap the number of outstanding tasks themselves.
pub struct WorkerPool<T: Send + 'static> {
    pool: ThreadPool,
    done_tx: Sender<Completion<T>>,
    done_rx: Receiver<Completion<T>>,
    next_id: TaskId,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(size: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|n| format!("timerscan-worker-{n}"))
            .build()?;
        let (done_tx, done_rx) = unbounded();

        debug!(size = pool.current_num_threads(), "worker pool started");
        Ok(Self {
            pool,
            done_tx,
            done_rx,
            next_id: 0,
        })
    }

    pub fn submit<F>(&mut self, job: F) -> TaskId
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let done = self.done_tx.clone();
        // rayon aborts the process on a panic escaping `spawn`.
        self.pool.spawn(move || {
            let output = panic::catch_unwind(AssertUnwindSafe(job));
            if output.is_err() {
                error!(task_id = id, "task panicked");
            }
            let _ = done.send(Completion { id, output });
        });
        id
    }

    pub fn completions(&self) -> &Receiver<Completion<T>> {
        &self.done_rx
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_every_submitted_task() {
        let mut pool = WorkerPool::new(3).unwrap();
        let ids: HashSet<_> = (0..10u64).map(|n| pool.submit(move || n * 2)).collect();

        let mut seen = HashSet::new();
        let mut sum = 0;
        for _ in 0..10 {
            let c = pool.completions().recv_timeout(Duration::from_secs(5)).unwrap();
            seen.insert(c.id);
            sum += c.output.unwrap();
        }
        assert_eq!(seen, ids);
        assert_eq!(sum, 90);
    }

    #[test]
    fn panics_are_reported_not_propagated() {
        let mut pool = WorkerPool::<u32>::new(1).unwrap();
        let bad = pool.submit(|| panic!("boom"));
        let good = pool.submit(|| 7);

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let c = pool.completions().recv_timeout(Duration::from_secs(5)).unwrap();
            outputs.push((c.id, c.output.ok()));
        }
        outputs.sort_by_key(|(id, _)| *id);
        assert_eq!(outputs, vec![(bad, None), (good, Some(7))]);
    }

    #[test]
    fn tasks_run_on_named_pool_threads() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.submit(|| thread::current().name().map(str::to_owned));

        let c = pool.completions().recv_timeout(Duration::from_secs(5)).unwrap();
        let name = c.output.unwrap().unwrap();
        assert!(name.starts_with("timerscan-worker-"), "{name}");
    }
}
