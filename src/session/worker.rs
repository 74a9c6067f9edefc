//! One background thread running load, compose and export jobs in FIFO order.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;

const WORKER_THREAD_NAME: &str = "stitcher-worker";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker has shut down")]
    Stopped,
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Cooperative cancellation flag shared by every job of a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A job returns `None` when it decided its result is no longer wanted.
pub type Job<R> = Box<dyn FnOnce(&CancelToken) -> Option<R> + Send + 'static>;

struct Running<R> {
    jobs: Sender<Job<R>>,
    results: Receiver<Option<R>>,
    handle: JoinHandle<()>,
}

/// Jobs queue behind the one in flight; two jobs never run at once.
pub struct Worker<R: Send + 'static> {
    running: Option<Running<R>>,
    cancel: CancelToken,
    pending: usize,
    stopped: bool,
}

impl<R: Send + 'static> Default for Worker<R> {
    fn default() -> Self {
        Self {
            running: None,
            cancel: CancelToken::default(),
            pending: 0,
            stopped: false,
        }
    }
}

impl<R: Send + 'static> Worker<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs submitted but not yet drained through `try_next`/`wait_next`.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn submit(&mut self, job: Job<R>) -> WorkerResult<()> {
        if self.stopped {
            return Err(WorkerError::Stopped);
        }
        if self.running.is_none() {
            self.running = Some(self.spawn()?);
        }
        let Some(running) = self.running.as_ref() else {
            return Err(WorkerError::Stopped);
        };
        running.jobs.send(job).map_err(|_| WorkerError::Stopped)?;
        self.pending += 1;
        Ok(())
    }

    fn spawn(&self) -> WorkerResult<Running<R>> {
        let (job_tx, job_rx) = mpsc::channel::<Job<R>>();
        let (result_tx, result_rx) = mpsc::channel::<Option<R>>();
        let cancel = self.cancel.clone();

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                for job in job_rx {
                    let result = if cancel.is_cancelled() {
                        None
                    } else {
                        job(&cancel)
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                tracing::debug!("worker thread exiting");
            })
            .map_err(WorkerError::Spawn)?;

        tracing::debug!("worker thread started");
        Ok(Running {
            jobs: job_tx,
            results: result_rx,
            handle,
        })
    }

    /// Next finished result without blocking.
    pub fn try_next(&mut self) -> Option<R> {
        loop {
            let running = self.running.as_ref()?;
            match running.results.try_recv() {
                Ok(result) => {
                    self.pending = self.pending.saturating_sub(1);
                    if result.is_some() {
                        return result;
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    self.lost_worker();
                    return None;
                }
            }
        }
    }

    /// Blocks until a job yields a result or nothing is pending.
    pub fn wait_next(&mut self) -> Option<R> {
        while self.pending > 0 {
            let running = self.running.as_ref()?;
            match running.results.recv() {
                Ok(result) => {
                    self.pending -= 1;
                    if result.is_some() {
                        return result;
                    }
                }
                Err(_) => {
                    self.lost_worker();
                    return None;
                }
            }
        }
        None
    }

    fn lost_worker(&mut self) {
        tracing::warn!(pending = self.pending, "worker thread stopped unexpectedly");
        self.pending = 0;
        self.stopped = true;
    }

    /// Cancels queued and in-flight jobs, waits for the thread and drops
    /// every undelivered result.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.stopped = true;
        let Some(Running {
            jobs,
            results,
            handle,
        }) = self.running.take()
        else {
            return;
        };
        drop(jobs);
        if handle.join().is_err() {
            tracing::warn!("worker thread panicked");
        }
        let discarded = results.try_iter().flatten().count();
        tracing::debug!(discarded, "worker shut down");
        self.pending = 0;
    }
}

impl<R: Send + 'static> Drop for Worker<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn worker_starts_lazily() {
        let mut worker = Worker::<u32>::new();
        assert!(worker.running.is_none());
        assert!(worker.try_next().is_none());
        assert!(worker.wait_next().is_none());

        worker.submit(Box::new(|_: &CancelToken| Some(7))).unwrap();
        assert!(worker.running.is_some());
        assert_eq!(worker.wait_next(), Some(7));
        assert!(worker.is_idle());
    }

    #[test]
    fn jobs_run_in_submission_order_one_at_a_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut worker = Worker::<usize>::new();
        for index in 0..5 {
            let log = log.clone();
            worker
                .submit(Box::new(move |_: &CancelToken| {
                    log.lock().unwrap().push(("start", index));
                    std::thread::sleep(Duration::from_millis(2));
                    log.lock().unwrap().push(("end", index));
                    Some(index)
                }))
                .unwrap();
        }

        let results = std::iter::from_fn(|| worker.wait_next()).collect::<Vec<_>>();
        assert_eq!(results, [0, 1, 2, 3, 4]);
        let log = log.lock().unwrap();
        for (pair, index) in log.chunks(2).zip(0..) {
            assert_eq!(pair, [("start", index), ("end", index)]);
        }
    }

    #[test]
    fn skipped_jobs_still_drain_pending() {
        let mut worker = Worker::<u8>::new();
        worker.submit(Box::new(|_: &CancelToken| None)).unwrap();
        worker.submit(Box::new(|_: &CancelToken| Some(2))).unwrap();
        assert_eq!(worker.pending(), 2);
        assert_eq!(worker.wait_next(), Some(2));
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn shutdown_cancels_queued_jobs() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::<()>::new();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        worker
            .submit(Box::new(move |token: &CancelToken| {
                let _ = gate_rx.recv();
                (!token.is_cancelled()).then_some(())
            }))
            .unwrap();
        let flag = ran.clone();
        worker
            .submit(Box::new(move |_: &CancelToken| {
                flag.store(true, Ordering::SeqCst);
                Some(())
            }))
            .unwrap();

        worker.cancel_token().cancel();
        gate_tx.send(()).unwrap();
        worker.shutdown();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(worker.is_idle());
        assert!(matches!(
            worker.submit(Box::new(|_: &CancelToken| Some(()))),
            Err(WorkerError::Stopped)
        ));
    }

    #[test]
    fn panicking_job_stops_worker() {
        let mut worker = Worker::<u8>::new();
        worker
            .submit(Box::new(|_: &CancelToken| -> Option<u8> { panic!("job failed") }))
            .unwrap();
        assert!(worker.wait_next().is_none());
        assert!(worker.is_idle());
        assert!(matches!(
            worker.submit(Box::new(|_: &CancelToken| Some(1))),
            Err(WorkerError::Stopped)
        ));
    }
}
