use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use futures::{channel::oneshot, future::LocalBoxFuture};

use crate::scheduler::SchedulerRef;

/// Runs detached futures on a scheduler with at most `limit` of them in
/// progress; the rest wait in submission order.
#[derive(Clone)]
pub(crate) struct WorkQueue {
  inner: Rc<WorkInner>,
}

struct WorkInner {
  limit: usize,
  scheduler: SchedulerRef,
  state: RefCell<WorkState>,
}

#[derive(Default)]
struct WorkState {
  running: usize,
  waiting: VecDeque<LocalBoxFuture<'static, ()>>,
  idle_waiters: Vec<oneshot::Sender<()>>,
}

impl WorkQueue {
  pub(crate) fn new(limit: usize, scheduler: SchedulerRef) -> Self {
    Self { inner: Rc::new(WorkInner { limit: limit.max(1), scheduler, state: RefCell::default() }) }
  }

  pub(crate) fn submit(&self, work: LocalBoxFuture<'static, ()>) {
    let start_now = {
      let mut state = self.inner.state.borrow_mut();
      if state.running < self.inner.limit {
        state.running += 1;
        Some(work)
      } else {
        state.waiting.push_back(work);
        None
      }
    };
    if let Some(work) = start_now {
      start(&self.inner, work);
    }
  }

  /// Running plus waiting work.
  pub(crate) fn outstanding(&self) -> usize {
    let state = self.inner.state.borrow();
    state.running + state.waiting.len()
  }

  /// Resolves once no work is running or waiting.
  pub(crate) async fn idle(&self) {
    let rx = {
      let mut state = self.inner.state.borrow_mut();
      if state.running == 0 && state.waiting.is_empty() {
        return;
      }
      let (tx, rx) = oneshot::channel();
      state.idle_waiters.push(tx);
      rx
    };
    let _ = rx.await;
  }
}

/// The slot for `work` is already counted in `running`.
fn start(inner: &Rc<WorkInner>, work: LocalBoxFuture<'static, ()>) {
  let owner = inner.clone();
  inner.scheduler.spawn(Box::pin(async move {
    work.await;
    finished(&owner);
  }));
}

fn finished(inner: &Rc<WorkInner>) {
  let (next, waiters) = {
    let mut state = inner.state.borrow_mut();
    match state.waiting.pop_front() {
      Some(next) => (Some(next), Vec::new()),
      None => {
        state.running = state.running.saturating_sub(1);
        let waiters = if state.running == 0 { std::mem::take(&mut state.idle_waiters) } else { Vec::new() };
        (None, waiters)
      }
    }
  };
  if let Some(next) = next {
    start(inner, next);
  }
  for waiter in waiters {
    let _ = waiter.send(());
  }
}
