use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::models::error::DeviceError;
use crate::traits::dispatch::{DispatchBridge, DispatchWork};

enum Job {
    Work(DispatchWork),
    Shutdown,
}

/// Serial execution context backed by one named worker thread.
///
/// Work runs in submission order. Dropping the queue runs everything already
/// submitted, then joins the worker.
pub struct DispatchQueue {
    label: String,
    sender: Sender<Job>,
    closed: AtomicBool,
    worker_id: ThreadId,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    completed: Arc<AtomicU64>,
}

impl DispatchQueue {
    pub fn new(label: impl Into<String>) -> Result<Self, DeviceError> {
        let label = label.into();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let completed = Arc::new(AtomicU64::new(0));

        let worker_completed = Arc::clone(&completed);
        let worker_label = label.clone();
        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(move || run_worker(&worker_label, receiver, &worker_completed))
            .map_err(|e| DeviceError::Unknown(format!("failed to spawn {} thread: {}", label, e)))?;

        log::debug!("dispatch queue '{}' started", label);
        Ok(Self {
            label,
            sender,
            closed: AtomicBool::new(false),
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
            completed,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the calling thread is this queue's worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of work items that have finished running.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Stop accepting work, drain what is queued and join the worker.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.send(Job::Shutdown);

        if self.is_current() {
            // Joining ourselves would deadlock; the worker exits after this job.
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("dispatch queue '{}' worker panicked", self.label);
            }
        }
        log::debug!("dispatch queue '{}' stopped", self.label);
    }
}

impl DispatchBridge for DispatchQueue {
    fn dispatch_async(&self, work: DispatchWork) {
        if self.is_closed() || self.sender.send(Job::Work(work)).is_err() {
            log::warn!("dispatch queue '{}' is closed, dropping async work", self.label);
        }
    }

    fn dispatch_sync(&self, work: DispatchWork) {
        if self.is_current() {
            work();
            return;
        }
        if self.is_closed() {
            log::warn!("dispatch queue '{}' is closed, dropping sync work", self.label);
            return;
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let job = Job::Work(Box::new(move || {
            work();
            let _ = done_tx.send(());
        }));
        if self.sender.send(job).is_err() {
            log::warn!("dispatch queue '{}' is closed, dropping sync work", self.label);
            return;
        }
        if done_rx.recv().is_err() {
            log::error!("sync work on '{}' did not complete", self.label);
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(label: &str, receiver: Receiver<Job>, completed: &AtomicU64) {
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Work(work) => {
                if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                    log::error!("work item on '{}' panicked", label);
                }
                completed.fetch_add(1, Ordering::AcqRel);
            }
            Job::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn sync_work_runs_before_return() {
        let queue = DispatchQueue::new("test-sync").unwrap();
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        queue.dispatch_sync(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn async_work_runs_in_order() {
        let queue = DispatchQueue::new("test-order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = Arc::clone(&log);
            queue.dispatch_async(Box::new(move || log.lock().push(i)));
        }
        // A sync barrier flushes everything submitted before it.
        queue.dispatch_sync(Box::new(|| {}));

        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn async_does_not_block_caller() {
        let queue = DispatchQueue::new("test-async").unwrap();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);

        queue.dispatch_async(Box::new(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = tx.send(());
        }));
        // Still pending: the caller got control back before the work finished.
        assert!(rx.try_recv().is_err());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn sync_from_worker_runs_inline() {
        let queue = Arc::new(DispatchQueue::new("test-reentrant").unwrap());
        let hits = Arc::new(AtomicU64::new(0));

        let inner_queue = Arc::clone(&queue);
        let h = Arc::clone(&hits);
        queue.dispatch_sync(Box::new(move || {
            assert!(inner_queue.is_current());
            let h2 = Arc::clone(&h);
            inner_queue.dispatch_sync(Box::new(move || {
                h2.fetch_add(1, Ordering::SeqCst);
            }));
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_drains_pending_work() {
        let queue = DispatchQueue::new("test-drain").unwrap();
        let hits = Arc::new(AtomicU64::new(0));
        for _ in 0..10 {
            let h = Arc::clone(&hits);
            queue.dispatch_async(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.shutdown();

        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(queue.completed_count(), 10);
        assert!(queue.is_closed());
    }

    #[test]
    fn work_after_shutdown_is_dropped() {
        let queue = DispatchQueue::new("test-closed").unwrap();
        queue.shutdown();

        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        queue.dispatch_sync(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_work_does_not_kill_queue() {
        let queue = DispatchQueue::new("test-panic").unwrap();
        queue.dispatch_async(Box::new(|| panic!("boom")));

        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        queue.dispatch_sync(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
