//! Background scheduler – one-shot, delayed and self-rescheduling tasks.
//!
//! ## Threading model
//!
//! ```text
//! Presentation thread           │  Tokio runtime
//! ───────────────────────────── │ ──────────────────────────────
//! TaskRunner::poll()            │  background worker
//!   → ui_rx.try_recv()          │    → bg_rx.recv().await
//!   → task()                    │    → task()   (one at a time, FIFO)
//!                               │
//! run_on(Thread::Ui, f)  ─────────────────────────► ui queue
//! run_after(thread, d, f)       │  sleep(d) → enqueue on `thread`
//! ```
//!
//! The presentation thread never touches async code; it drains a
//! `crossbeam_channel` receiver.  Background tasks run strictly in enqueue
//! order, which is what gives the event bus its per-handler ordering.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

/// Execution context a task or bus delivery is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Thread {
    /// The single presentation thread; runs only when it calls `poll`.
    Ui,
    /// The shared background worker.
    Background,
}

type Task = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Dispatcher (cloneable enqueue side)
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Dispatcher {
    background: mpsc::UnboundedSender<Task>,
    ui: Sender<Task>,
}

impl Dispatcher {
    fn dispatch(&self, thread: Thread, task: Task) {
        let queued = match thread {
            Thread::Background => self.background.send(task).is_ok(),
            Thread::Ui => self.ui.send(task).is_ok(),
        };
        if !queued {
            warn!("{:?} queue closed – dropping task", thread);
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

pub struct TaskRunner {
    handle: Handle,
    dispatcher: Dispatcher,
    ui_rx: Receiver<Task>,
}

impl TaskRunner {
    /// Build a runner on the current Tokio runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        let (bg_tx, mut bg_rx) = mpsc::unbounded_channel::<Task>();
        let (ui_tx, ui_rx) = crossbeam_channel::unbounded::<Task>();

        handle.spawn(async move {
            while let Some(task) = bg_rx.recv().await {
                run_guarded(task);
            }
        });

        Self {
            handle,
            dispatcher: Dispatcher {
                background: bg_tx,
                ui: ui_tx,
            },
            ui_rx,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queue `f` on `thread` without delay.
    pub fn run_on<F>(&self, thread: Thread, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.dispatch(thread, Box::new(f));
    }

    /// Queue `f` on `thread` once `delay` has elapsed.
    ///
    /// There is no cancellation: a task that must stop re-arming itself
    /// checks a liveness flag of its own when it runs.
    pub fn run_after<F>(&self, thread: Thread, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.dispatch(thread, Box::new(f));
        });
    }

    /// Run every task queued for the presentation thread.  Never blocks.
    /// Returns the number of tasks executed.
    pub fn poll(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.ui_rx.try_recv() {
                Ok(task) => {
                    run_guarded(task);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    pub fn pending_ui(&self) -> usize {
        self.ui_rx.len()
    }
}

/// A panicking task is logged and dropped; it never takes the worker down
/// or unwinds into another context.
fn run_guarded(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("Scheduled task panicked");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn background_tasks_run_in_order() {
        let runner = TaskRunner::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            runner.run_on(Thread::Background, move || seen.lock().push(i));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn ui_tasks_wait_for_poll() {
        let runner = TaskRunner::new().unwrap();
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        runner.run_on(Thread::Ui, move || *s.lock() += 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*seen.lock(), 0);
        assert_eq!(runner.pending_ui(), 1);

        assert_eq!(runner.poll(), 1);
        assert_eq!(*seen.lock(), 1);
        assert_eq!(runner.poll(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_fires_after_delay() {
        let runner = TaskRunner::new().unwrap();
        let seen = Arc::new(Mutex::new(false));
        let s = seen.clone();
        runner.run_after(Thread::Background, Duration::from_millis(150), move || {
            *s.lock() = true
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!*seen.lock());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(*seen.lock());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_does_not_stop_worker() {
        let runner = TaskRunner::new().unwrap();
        let seen = Arc::new(Mutex::new(false));
        runner.run_on(Thread::Background, || panic!("boom"));
        let s = seen.clone();
        runner.run_on(Thread::Background, move || *s.lock() = true);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(*seen.lock());
    }

    #[test]
    fn requires_a_runtime() {
        assert!(matches!(TaskRunner::new(), Err(SyncError::NoRuntime)));
    }
}
