//! Fixed-parallelism visitor pool for graph traversals.
//!
//! Tasks run to completion and may enqueue further tasks on the same pool.
//! The pool is fail-fast: the first task error is recorded, every task still
//! in the queue is drained without running, and the error surfaces from the
//! next quiescence wait. Workers are scoped threads, so tasks may borrow the
//! graph and the shared mark state for the duration of the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Scope;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::FocusError;

/// Idle workers park on the queue for this long before rechecking.
const KEEP_ALIVE: Duration = Duration::from_secs(120);

type Task<'s> = Box<dyn FnOnce(&PoolHandle<'s>) -> Result<(), FocusError> + Send + 's>;

enum Message<'s> {
    Task(Task<'s>),
    Shutdown,
}

#[derive(Default)]
struct PoolState {
    pending: Mutex<usize>,
    quiesced: Condvar,
    cancelled: AtomicBool,
    failure: Mutex<Option<FocusError>>,
}

/// Cloneable handle passed into tasks so they can enqueue follow-up work.
pub(crate) struct PoolHandle<'s> {
    tx: Sender<Message<'s>>,
    state: Arc<PoolState>,
}

impl<'s> Clone for PoolHandle<'s> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<'s> PoolHandle<'s> {
    /// Enqueue a task. Counted as pending until it runs (or is drained
    /// after a failure).
    pub(crate) fn submit<F>(&self, task: F)
    where
        F: FnOnce(&PoolHandle<'s>) -> Result<(), FocusError> + Send + 's,
    {
        {
            let mut pending = self.state.pending.lock().expect("pool state poisoned");
            *pending += 1;
        }
        self.tx
            .send(Message::Task(Box::new(task)))
            .expect("visitor pool queue closed while tasks are pending");
    }

    fn record_failure(&self, error: FocusError) {
        let mut failure = self.state.failure.lock().expect("pool state poisoned");
        if failure.is_none() {
            *failure = Some(error);
        }
        self.state.cancelled.store(true, Ordering::Release);
    }

    fn finish_task(&self) {
        let mut pending = self.state.pending.lock().expect("pool state poisoned");
        *pending -= 1;
        if *pending == 0 {
            self.state.quiesced.notify_all();
        }
    }
}

/// The pool itself; owned by the focus run.
pub(crate) struct VisitorPool<'s> {
    handle: PoolHandle<'s>,
    workers: usize,
}

impl<'s> VisitorPool<'s> {
    /// Spawn `workers` named worker threads into `scope`.
    pub(crate) fn start<'env>(scope: &'s Scope<'s, 'env>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = channel::unbounded::<Message<'s>>();
        let handle = PoolHandle {
            tx,
            state: Arc::new(PoolState::default()),
        };
        for n in 0..workers {
            let rx = rx.clone();
            let handle = handle.clone();
            std::thread::Builder::new()
                .name(format!("focus-pool-{n}"))
                .spawn_scoped(scope, move || worker_loop(rx, handle))
                .expect("failed to spawn focus worker");
        }
        Self { handle, workers }
    }

    pub(crate) fn parallelism(&self) -> usize {
        self.workers
    }

    pub(crate) fn submit<F>(&self, task: F)
    where
        F: FnOnce(&PoolHandle<'s>) -> Result<(), FocusError> + Send + 's,
    {
        self.handle.submit(task);
    }

    /// Block until the queue is empty and all workers are idle, then
    /// surface the first recorded failure, if any. The pool stays alive;
    /// further tasks may be submitted afterwards.
    pub(crate) fn await_quiescence(&self) -> Result<(), FocusError> {
        let state = &self.handle.state;
        {
            let mut pending = state.pending.lock().expect("pool state poisoned");
            while *pending > 0 {
                pending = state
                    .quiesced
                    .wait(pending)
                    .expect("pool state poisoned");
            }
        }
        match state.failure.lock().expect("pool state poisoned").take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Stop all workers. Must only be called at quiescence.
    pub(crate) fn shutdown(&self) {
        for _ in 0..self.workers {
            self.handle
                .tx
                .send(Message::Shutdown)
                .expect("visitor pool queue closed before shutdown");
        }
    }
}

fn worker_loop<'s>(rx: Receiver<Message<'s>>, handle: PoolHandle<'s>) {
    loop {
        match rx.recv_timeout(KEEP_ALIVE) {
            Ok(Message::Task(task)) => {
                if !handle.state.cancelled.load(Ordering::Acquire) {
                    // A panicking task would leak its pending count and
                    // hang quiescence; turn it into a run failure instead.
                    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task(&handle)))
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => handle.record_failure(error),
                        Err(_) => {
                            handle.record_failure(FocusError::internal("visitor task panicked"))
                        }
                    }
                }
                handle.finish_task();
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            // Keep-alive lapse while idle; recheck the queue.
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }
}
