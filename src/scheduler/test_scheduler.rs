//! Test Scheduler for deterministic testing of time-based dispatch.
//!
//! Provides virtual time that only advances when explicitly instructed,
//! enabling deterministic testing of debounce, throttle, asynchronous replay
//! and the periodic memory sweep.
//!
//! # Usage
//!
//! ```rust
//! use std::{rc::Rc, time::Duration};
//!
//! use rxnotify::prelude::*;
//!
//! // Initialize the test scheduler (required before use)
//! TestScheduler::init();
//!
//! let subject = Subject::<i32>::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
//! subject
//!   .add_observer(|v: i32| println!("{v}"), ObserverOptions::new().debounce(Duration::from_millis(100)))
//!   .unwrap();
//! subject.notify_sync(1).unwrap();
//!
//! // Advance virtual time to let the debounced call fire
//! TestScheduler::advance_by(Duration::from_millis(100));
//!
//! // Or execute all pending tasks
//! TestScheduler::flush();
//! ```
//!
//! # Thread Safety
//!
//! TestScheduler uses thread-local storage, so each thread has its own
//! independent virtual time, task queue and future pool. This keeps tests
//! isolated when they run in parallel.

use std::{
  cell::RefCell,
  cmp::Ordering,
  collections::BinaryHeap,
  time::Duration,
};

use futures::{
  executor::{LocalPool, LocalSpawner},
  future::LocalBoxFuture,
  task::LocalSpawnExt,
};

use super::{Scheduler, TaskFn, TaskHandle};

// ==================== Internal State ====================

#[derive(Default)]
struct TestSchedulerState {
  virtual_time: Duration,
  task_queue: BinaryHeap<ScheduledTask>,
  next_task_id: usize,
  initialized: bool,
}

struct ScheduledTask {
  scheduled_time: Duration,
  task_id: usize,
  task: TaskFn,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool {
    self.scheduled_time == other.scheduled_time && self.task_id == other.task_id
  }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by task_id
    other
      .scheduled_time
      .cmp(&self.scheduled_time)
      .then_with(|| other.task_id.cmp(&self.task_id))
  }
}

struct FuturePool {
  pool: LocalPool,
  spawner: LocalSpawner,
}

impl FuturePool {
  fn new() -> Self {
    let pool = LocalPool::new();
    let spawner = pool.spawner();
    Self { pool, spawner }
  }
}

thread_local! {
  static TEST_SCHEDULER_STATE: RefCell<TestSchedulerState>
    = RefCell::new(TestSchedulerState::default());
  static FUTURE_POOL: RefCell<FuturePool> = RefCell::new(FuturePool::new());
  static SPAWNER: RefCell<Option<LocalSpawner>> = const { RefCell::new(None) };
}

// ==================== TestScheduler ====================

/// A virtual time scheduler for deterministic testing.
///
/// This is a zero-sized type that accesses thread-local state.
/// All instances in the same thread share the same virtual time and task queue.
#[derive(Clone, Copy, Default, Debug)]
pub struct TestScheduler;

impl TestScheduler {
  /// Initialize or reset the test scheduler state.
  ///
  /// Resets the virtual time to zero, clears the task queue and drops every
  /// future that is still parked in the pool.
  ///
  /// # Panics
  ///
  /// Other methods will panic if `init()` has not been called first.
  pub fn init() {
    TEST_SCHEDULER_STATE.with(|state| {
      let mut state = state.borrow_mut();
      state.virtual_time = Duration::ZERO;
      state.task_queue.clear();
      state.next_task_id = 0;
      state.initialized = true;
    });
    let spawner = FUTURE_POOL.with(|pool| {
      let mut pool = pool.borrow_mut();
      *pool = FuturePool::new();
      pool.spawner.clone()
    });
    SPAWNER.with(|s| *s.borrow_mut() = Some(spawner));
  }

  fn ensure_initialized() {
    TEST_SCHEDULER_STATE.with(|state| {
      assert!(
        state.borrow().initialized,
        "TestScheduler::init() must be called before using the scheduler"
      );
    });
  }

  /// Get the current virtual time.
  ///
  /// # Panics
  ///
  /// Panics if `init()` has not been called first.
  pub fn now() -> Duration {
    Self::ensure_initialized();
    TEST_SCHEDULER_STATE.with(|state| state.borrow().virtual_time)
  }

  /// Get the number of pending (not yet executed) tasks.
  pub fn pending_count() -> usize {
    Self::ensure_initialized();
    TEST_SCHEDULER_STATE.with(|state| {
      state
        .borrow()
        .task_queue
        .iter()
        .filter(|t| t.handle.is_pending())
        .count()
    })
  }

  /// Check if there are no pending tasks.
  pub fn is_empty() -> bool { Self::pending_count() == 0 }

  /// Poll every spawned future until none can make progress.
  pub fn run_until_stalled() {
    FUTURE_POOL.with(|pool| {
      // Already running further up the stack: that loop picks up new work.
      if let Ok(mut pool) = pool.try_borrow_mut() {
        pool.pool.run_until_stalled();
      }
    });
  }

  fn execute_tasks_until(target_time: Option<Duration>) {
    Self::run_until_stalled();
    loop {
      let task = TEST_SCHEDULER_STATE.with(|state| {
        let mut state = state.borrow_mut();

        let should_stop = state
          .task_queue
          .peek()
          .is_none_or(|peek| target_time.is_some_and(|limit| peek.scheduled_time > limit));
        if should_stop {
          return None;
        }

        let scheduled_task = state.task_queue.pop()?;
        if scheduled_task.scheduled_time > state.virtual_time {
          state.virtual_time = scheduled_task.scheduled_time;
        }
        Some(scheduled_task)
      });

      let Some(scheduled_task) = task else {
        break;
      };

      scheduled_task.handle.run(scheduled_task.task);
      Self::run_until_stalled();
    }
  }

  /// Advance virtual time by the specified duration and execute due tasks.
  ///
  /// Tasks are executed in order of their scheduled time, with FIFO ordering
  /// for tasks scheduled at the same time.
  ///
  /// # Panics
  ///
  /// Panics if `init()` has not been called first.
  pub fn advance_by(duration: Duration) {
    Self::ensure_initialized();
    let target_time = TEST_SCHEDULER_STATE.with(|state| state.borrow().virtual_time + duration);

    Self::execute_tasks_until(Some(target_time));

    TEST_SCHEDULER_STATE.with(|state| {
      state.borrow_mut().virtual_time = target_time;
    });
    Self::run_until_stalled();
  }

  /// Execute all pending tasks by advancing time to each task's scheduled time.
  ///
  /// # Panics
  ///
  /// Panics if `init()` has not been called first.
  pub fn flush() {
    Self::ensure_initialized();
    Self::execute_tasks_until(None);
  }
}

impl Scheduler for TestScheduler {
  fn now(&self) -> Duration { TestScheduler::now() }

  fn schedule(&self, delay: Option<Duration>, task: TaskFn) -> TaskHandle {
    TestScheduler::ensure_initialized();
    TEST_SCHEDULER_STATE.with(|state| {
      let mut state = state.borrow_mut();

      let scheduled_time = state.virtual_time + delay.unwrap_or(Duration::ZERO);
      let handle = TaskHandle::new();
      let task_id = state.next_task_id;
      state.next_task_id += 1;

      state
        .task_queue
        .push(ScheduledTask { scheduled_time, task_id, task, handle: handle.clone() });

      handle
    })
  }

  fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
    TestScheduler::ensure_initialized();
    let spawned = SPAWNER.with(|s| s.borrow().as_ref().map(|spawner| spawner.spawn_local(future)));
    if let Some(Err(err)) = spawned {
      tracing::warn!(error = %err, "test scheduler rejected a spawned future");
    }
    TestScheduler::run_until_stalled();
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::Cell, mem, rc::Rc};

  use super::*;

  // ==================== Basic Properties ====================

  #[rxnotify_macro::test]
  fn test_zero_sized_and_copy() {
    assert_eq!(mem::size_of::<TestScheduler>(), 0);

    let s1 = TestScheduler;
    let s2 = s1;
    let _s3 = s1;
    let _s4 = s2;
  }

  #[rxnotify_macro::test]
  fn test_init_and_reset() {
    TestScheduler::init();
    assert_eq!(TestScheduler::now(), Duration::ZERO);
    assert!(TestScheduler::is_empty());

    TestScheduler::advance_by(Duration::from_millis(100));
    assert_eq!(TestScheduler::now(), Duration::from_millis(100));

    TestScheduler::init();
    assert_eq!(TestScheduler::now(), Duration::ZERO);
  }

  #[rxnotify_macro::test]
  #[should_panic(expected = "TestScheduler::init() must be called")]
  fn test_panics_without_init() {
    TEST_SCHEDULER_STATE.with(|s| s.borrow_mut().initialized = false);
    TestScheduler::now();
  }

  // ==================== Task Scheduling ====================

  #[rxnotify_macro::test]
  fn test_schedule_immediate_and_delayed() {
    TestScheduler::init();

    let results = Rc::new(RefCell::new(Vec::new()));

    let r = results.clone();
    TestScheduler.schedule(None, Box::new(move || r.borrow_mut().push("immediate")));

    let r = results.clone();
    TestScheduler
      .schedule(Some(Duration::from_millis(100)), Box::new(move || r.borrow_mut().push("delayed")));

    assert_eq!(TestScheduler::pending_count(), 2);

    TestScheduler::advance_by(Duration::ZERO);
    assert_eq!(*results.borrow(), vec!["immediate"]);

    TestScheduler::advance_by(Duration::from_millis(100));
    assert_eq!(*results.borrow(), vec!["immediate", "delayed"]);
  }

  #[rxnotify_macro::test]
  fn test_task_cancellation() {
    TestScheduler::init();

    let executed = Rc::new(Cell::new(false));
    let e = executed.clone();

    let handle = TestScheduler.schedule(Some(Duration::from_millis(100)), Box::new(move || e.set(true)));

    handle.cancel();
    assert_eq!(TestScheduler::pending_count(), 0);
    TestScheduler::advance_by(Duration::from_millis(150));

    assert!(!executed.get());
  }

  #[rxnotify_macro::test]
  fn test_fifo_ordering_same_time() {
    TestScheduler::init();

    let order = Rc::new(RefCell::new(Vec::new()));

    for i in 0..5 {
      let o = order.clone();
      TestScheduler.schedule(Some(Duration::from_millis(10)), Box::new(move || o.borrow_mut().push(i)));
    }

    TestScheduler::flush();
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    assert_eq!(TestScheduler::now(), Duration::from_millis(10));
  }

  #[rxnotify_macro::test]
  fn test_nested_schedule_runs_in_same_flush() {
    TestScheduler::init();

    let hits = Rc::new(Cell::new(0));
    let h = hits.clone();
    TestScheduler.schedule(
      Some(Duration::from_millis(5)),
      Box::new(move || {
        h.set(h.get() + 1);
        let h = h.clone();
        TestScheduler.schedule(Some(Duration::from_millis(5)), Box::new(move || h.set(h.get() + 1)));
      }),
    );

    TestScheduler::flush();
    assert_eq!(hits.get(), 2);
    assert_eq!(TestScheduler::now(), Duration::from_millis(10));
  }

  #[rxnotify_macro::test]
  fn test_spawned_future_runs_immediately() {
    TestScheduler::init();

    let done = Rc::new(Cell::new(false));
    let d = done.clone();
    TestScheduler.spawn(Box::pin(async move { d.set(true) }));
    assert!(done.get());
  }

  #[rxnotify_macro::test]
  fn test_spawned_future_waits_for_channel() {
    TestScheduler::init();

    let (tx, rx) = futures::channel::oneshot::channel::<i32>();
    let got = Rc::new(Cell::new(0));
    let g = got.clone();
    TestScheduler.spawn(Box::pin(async move {
      if let Ok(v) = rx.await {
        g.set(v);
      }
    }));
    assert_eq!(got.get(), 0);

    let _ = tx.send(7);
    TestScheduler::run_until_stalled();
    assert_eq!(got.get(), 7);
  }
}
