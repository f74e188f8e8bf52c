//! Marshalling of work back onto the control thread.
//!
//! Workers never touch display or cache state directly. Everything they
//! want to apply is wrapped in a [`ControlTask`] and posted; the control
//! thread runs posted tasks in its own loop, once per iteration. The
//! default transport is an unbounded tokio channel, but anything that can
//! run a closure on the control thread may implement [`ControlPost`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

/// A unit of work that must execute on the control thread.
pub type ControlTask = Box<dyn FnOnce() + Send + 'static>;

/// Injectable "post to control thread" function.
pub trait ControlPost: Send + Sync {
    /// Schedule `task` to run on the control thread. Must not block and
    /// must never run `task` inline on the calling thread.
    fn post(&self, task: ControlTask);
}

impl<P: ControlPost + ?Sized> ControlPost for Arc<P> {
    fn post(&self, task: ControlTask) {
        (**self).post(task)
    }
}

// =============================================================================
// Control Queue
// =============================================================================

/// Cloneable sending side of a [`ControlQueue`].
#[derive(Clone)]
pub struct ControlPoster {
    sender: mpsc::UnboundedSender<ControlTask>,
}

impl ControlPost for ControlPoster {
    fn post(&self, task: ControlTask) {
        if self.sender.send(task).is_err() {
            debug!("Control queue closed, dropping posted task");
        }
    }
}

/// Thread-safe queue drained by the control loop.
///
/// The queue is owned by the control thread; workers hold
/// [`ControlPoster`]s obtained from [`ControlQueue::poster`].
pub struct ControlQueue {
    sender: mpsc::UnboundedSender<ControlTask>,
    receiver: mpsc::UnboundedReceiver<ControlTask>,
}

impl ControlQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    /// A handle workers can use to post tasks.
    pub fn poster(&self) -> ControlPoster {
        ControlPoster {
            sender: self.sender.clone(),
        }
    }

    /// Run the tasks queued at entry, without waiting.
    ///
    /// Tasks posted while draining wait for the next call, so one call
    /// always returns even while workers keep posting. Returns the number
    /// of tasks run.
    pub fn drain(&mut self) -> usize {
        let queued = self.receiver.len();
        let mut ran = 0;
        while ran < queued {
            let Ok(task) = self.receiver.try_recv() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Wait for the next task and run it.
    ///
    /// Suspends the calling task without blocking its thread. Returns
    /// `false` only if every sender is gone, which cannot happen while the
    /// queue itself is alive.
    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for ControlQueue {
    fn default() -> Self {
        Self::new()
    }
}
