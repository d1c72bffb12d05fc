//! Per-subscriber delivery pipeline.
//!
//! One value travels `filter -> transform -> debounce -> throttle ->
//! execute` for each subscriber of a round. Failures stay local to the
//! subscriber and are resolved by its [`ErrorHandling`] policy; only the
//! `Throw` policy hands an error back to the round.

use std::{
  panic::{catch_unwind, AssertUnwindSafe},
  rc::Rc,
  time::{Duration, Instant},
};

use futures::future::LocalBoxFuture;
use tracing::{debug, trace, warn};

use super::{
  config::ErrorHandling,
  subscribers::{PendingDebounce, Subscriber},
  Subject,
};
use crate::{
  error::{CallbackError, RxError},
  id::ObserverId,
  metrics::Timed,
  observer::{guarded, Reaction},
};

/// The outcome of handing one value to one subscriber.
pub(crate) enum Step {
  Done(Result<(), RxError>),
  Suspended(LocalBoxFuture<'static, Result<(), RxError>>),
}

impl Step {
  #[inline]
  fn accepted() -> Self { Step::Done(Ok(())) }
}

impl<T: Clone + 'static> Subject<T> {
  /// Live delivery. Replay values still owed to the subscriber go first.
  pub(crate) fn deliver(&self, sub: &Rc<Subscriber<T>>, value: T) -> Step {
    self.flush_replay(sub);
    self.process(sub, value)
  }

  /// Hand the subscriber its outstanding replay backlog, in buffer order.
  pub(crate) fn flush_replay(&self, sub: &Rc<Subscriber<T>>) {
    let Some(backlog) = sub.take_pending_replay() else { return };
    trace!(subject = %self.inner.id, observer = %sub.id, count = backlog.len(), "replaying");
    for value in backlog {
      if !sub.is_active() {
        break;
      }
      let step = self.process(sub, value);
      self.run_detached(sub.id, step);
    }
  }

  pub(crate) fn process(&self, sub: &Rc<Subscriber<T>>, value: T) -> Step {
    if !sub.is_active() {
      return Step::accepted();
    }
    let options = &sub.options;

    if let Some(filter) = &options.filter {
      match catch_unwind(AssertUnwindSafe(|| filter(&value))) {
        Ok(true) => {}
        Ok(false) => return Step::accepted(),
        Err(payload) => {
          let err = RxError::Filter { observer: sub.id, cause: CallbackError::from_panic(payload) };
          return Step::Done(self.fail(sub, err, Some(&value)));
        }
      }
    }

    let value = match &options.transform {
      Some(transform) => {
        let outcome = catch_unwind(AssertUnwindSafe(|| transform(value.clone())))
          .unwrap_or_else(|payload| Err(CallbackError::from_panic(payload)));
        match outcome {
          Ok(transformed) => transformed,
          Err(cause) => {
            let err = RxError::Transform { observer: sub.id, cause };
            return Step::Done(self.fail(sub, err, Some(&value)));
          }
        }
      }
      None => value,
    };

    if let Some(delay) = options.debounce {
      self.arm_debounce(sub, value, delay);
      return Step::accepted();
    }

    if let Some(window) = options.throttle {
      let now = self.inner.scheduler.now();
      let last = sub.state.borrow().last_fired;
      if matches!(last, Some(last) if now.saturating_sub(last) < window) {
        trace!(subject = %self.inner.id, observer = %sub.id, "throttled");
        return Step::accepted();
      }
    }

    self.execute(sub, value)
  }

  /// Replace any pending debounced value and restart the timer.
  fn arm_debounce(&self, sub: &Rc<Subscriber<T>>, value: T, delay: Duration) {
    sub.cancel_debounce();
    let subject = Rc::downgrade(&self.inner);
    let record = Rc::downgrade(sub);
    let handle = self.inner.scheduler.schedule(
      Some(delay),
      Box::new(move || {
        let (Some(inner), Some(sub)) = (subject.upgrade(), record.upgrade()) else { return };
        let Some(value) = sub.take_debounced() else { return };
        let subject = Subject { inner };
        if subject.is_disposed() || !sub.is_active() {
          return;
        }
        let step = subject.execute(&sub, value);
        subject.run_detached(sub.id, step);
      }),
    );
    sub.state.borrow_mut().debounce = Some(PendingDebounce { handle, value });
  }

  /// Invoke the observer itself.
  pub(crate) fn execute(&self, sub: &Rc<Subscriber<T>>, value: T) -> Step {
    let Some(observer) = sub.target.upgrade() else {
      debug!(subject = %self.inner.id, observer = %sub.id, "weak observer is gone, removing");
      self.inner.remove_subscriber(sub.id);
      return Step::accepted();
    };
    if sub.options.once {
      // Leaves the registry before it runs, so a re-entrant notify can't fire it twice.
      self.inner.remove_subscriber(sub.id);
    }

    sub.record_execution(self.inner.scheduler.now(), &value);
    trace!(subject = %self.inner.id, observer = %sub.id, "executing");
    let started = Instant::now();
    match guarded(|| observer.next(value.clone())) {
      Reaction::Settled(res) => {
        self.inner.record_execution(started.elapsed());
        Step::Done(self.settle(sub, res, &value))
      }
      Reaction::Suspended(fut) => {
        let subject = self.clone();
        let sub = sub.clone();
        Step::Suspended(Box::pin(async move {
          let (res, elapsed) = Timed::new(fut).await;
          subject.inner.record_execution(elapsed);
          subject.settle(&sub, res, &value)
        }))
      }
    }
  }

  fn settle(&self, sub: &Subscriber<T>, res: Result<(), CallbackError>, value: &T) -> Result<(), RxError> {
    match res {
      Ok(()) => {
        self.inner.state.borrow_mut().metrics.record_success();
        Ok(())
      }
      Err(cause) => self.fail(sub, RxError::Execution { observer: sub.id, cause }, Some(value)),
    }
  }

  /// Resolve a subscriber failure through its error policy.
  pub(crate) fn fail(&self, sub: &Subscriber<T>, err: RxError, value: Option<&T>) -> Result<(), RxError> {
    self.inner.state.borrow_mut().metrics.record_error();
    match &sub.options.error_handling {
      ErrorHandling::Throw => Err(err),
      ErrorHandling::Silent => {
        trace!(subject = %self.inner.id, observer = %sub.id, error = %err, "failure silenced");
        Ok(())
      }
      ErrorHandling::Callback(handler) => {
        if catch_unwind(AssertUnwindSafe(|| handler(&err, value, self))).is_err() {
          warn!(subject = %self.inner.id, observer = %sub.id, "error handler panicked");
        }
        Ok(())
      }
    }
  }

  /// Finish a step nobody awaits: failures can only be logged.
  pub(crate) fn run_detached(&self, observer: ObserverId, step: Step) {
    let subject = self.inner.id;
    match step {
      Step::Done(Ok(())) => {}
      Step::Done(Err(err)) => warn!(%subject, %observer, error = %err, "unobserved delivery failure"),
      Step::Suspended(fut) => self.inner.scheduler.spawn(Box::pin(async move {
        if let Err(err) = fut.await {
          warn!(%subject, %observer, error = %err, "unobserved delivery failure");
        }
      })),
    }
  }
}
