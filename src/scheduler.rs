//! Delayed-execution capability.
//!
//! Debounce, throttle, asynchronous replay, fire-and-forget callbacks and the
//! periodic memory sweep all go through a [`Scheduler`], so the dispatch
//! logic does not care whether time comes from tokio or from the virtual
//! clock of [`TestScheduler`].

use std::{cell::Cell, rc::Rc, time::Duration};

use futures::future::LocalBoxFuture;

pub mod test_scheduler;
#[cfg(feature = "tokio-scheduler")]
pub mod tokio_scheduler;

pub use test_scheduler::TestScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;

/// A boxed task run once by a scheduler.
pub type TaskFn = Box<dyn FnOnce() + 'static>;

/// Shared, type-erased scheduler handle as stored by subjects and emitters.
pub type SchedulerRef = Rc<dyn Scheduler>;

/// Single-threaded scheduling capability.
pub trait Scheduler {
  /// Monotonic time elapsed since the scheduler's epoch.
  fn now(&self) -> Duration;

  /// Run `task` after `delay` (or on the next turn when `None`).
  fn schedule(&self, delay: Option<Duration>, task: TaskFn) -> TaskHandle;

  /// Drive `future` to completion in the background.
  fn spawn(&self, future: LocalBoxFuture<'static, ()>);
}

/// The scheduler used when none is supplied explicitly.
#[cfg(feature = "tokio-scheduler")]
pub fn default_scheduler() -> SchedulerRef { Rc::new(TokioScheduler::new()) }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum HandleState {
  Pending,
  Running,
  Finished,
  Cancelled,
}

/// Handle to a scheduled task.
///
/// Cancelling only prevents a task that has not started yet; a running task
/// is never interrupted.
#[derive(Clone, Debug)]
pub struct TaskHandle {
  state: Rc<Cell<HandleState>>,
}

impl Default for TaskHandle {
  fn default() -> Self { Self::new() }
}

impl TaskHandle {
  pub fn new() -> Self { Self { state: Rc::new(Cell::new(HandleState::Pending)) } }

  /// Cancel the task if it has not started. Returns whether it was pending.
  pub fn cancel(&self) -> bool {
    if self.state.get() == HandleState::Pending {
      self.state.set(HandleState::Cancelled);
      true
    } else {
      false
    }
  }

  pub fn is_cancelled(&self) -> bool { self.state.get() == HandleState::Cancelled }

  pub fn is_finished(&self) -> bool { self.state.get() == HandleState::Finished }

  pub fn is_pending(&self) -> bool { self.state.get() == HandleState::Pending }

  /// Claim the task for execution; false if it was cancelled meanwhile.
  pub(crate) fn begin(&self) -> bool {
    if self.state.get() == HandleState::Pending {
      self.state.set(HandleState::Running);
      true
    } else {
      false
    }
  }

  pub(crate) fn mark_finished(&self) {
    if self.state.get() != HandleState::Cancelled {
      self.state.set(HandleState::Finished);
    }
  }

  /// Run `task` through the handle's state machine.
  pub(crate) fn run(&self, task: TaskFn) {
    if self.begin() {
      task();
      self.mark_finished();
    }
  }
}
