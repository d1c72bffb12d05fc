use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::time::Instant;

use super::{Scheduler, TaskFn, TaskHandle};

/// Scheduler backed by the current tokio runtime.
///
/// Tasks are spawned with [`tokio::task::spawn_local`], so every call that
/// schedules work must happen inside a [`tokio::task::LocalSet`].
#[derive(Clone, Copy, Debug)]
pub struct TokioScheduler {
  epoch: Instant,
}

impl Default for TokioScheduler {
  fn default() -> Self { Self::new() }
}

impl TokioScheduler {
  pub fn new() -> Self { Self { epoch: Instant::now() } }
}

impl Scheduler for TokioScheduler {
  fn now(&self) -> Duration { Instant::now().saturating_duration_since(self.epoch) }

  fn schedule(&self, delay: Option<Duration>, task: TaskFn) -> TaskHandle {
    let handle = TaskHandle::new();
    let guard = handle.clone();
    tokio::task::spawn_local(async move {
      match delay {
        Some(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
        _ => tokio::task::yield_now().await,
      }
      guard.run(task);
    });
    handle
  }

  fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
    tokio::task::spawn_local(future);
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;

  #[rxnotify_macro::test(paused)]
  async fn delayed_tasks_fire_in_order() {
    let scheduler = TokioScheduler::new();
    let order = Rc::new(RefCell::new(vec![]));

    let o = order.clone();
    scheduler.schedule(Some(Duration::from_millis(20)), Box::new(move || o.borrow_mut().push(2)));
    let o = order.clone();
    scheduler.schedule(Some(Duration::from_millis(10)), Box::new(move || o.borrow_mut().push(1)));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(*order.borrow(), vec![1, 2]);
    assert!(scheduler.now() >= Duration::from_millis(30));
  }

  #[rxnotify_macro::test(paused)]
  async fn cancelled_task_never_runs() {
    let scheduler = TokioScheduler::new();
    let ran = Rc::new(RefCell::new(false));
    let r = ran.clone();
    let handle =
      scheduler.schedule(Some(Duration::from_millis(10)), Box::new(move || *r.borrow_mut() = true));
    handle.cancel();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!*ran.borrow());
  }
}
