use std::{cell::RefCell, ops::Deref, rc::Rc};

use futures::future::join_all;
use tracing::warn;

use super::{dispatch::Step, Subject, SubjectConfig};
use crate::{error::Result, scheduler::SchedulerRef};

/// A subject that resolves exactly once.
///
/// `notify` only records the value. On [`complete`](Self::complete) the last
/// recorded value, if any, is delivered to the observers, followed by the
/// completion signal.
#[derive(Clone)]
pub struct AsyncSubject<T> {
  pub(crate) subject: Subject<T>,
  last: Rc<RefCell<Option<T>>>,
}

#[cfg(feature = "tokio-scheduler")]
impl<T: Clone + 'static> Default for AsyncSubject<T> {
  fn default() -> Self { Self::new() }
}

#[cfg(feature = "tokio-scheduler")]
impl<T: Clone + 'static> AsyncSubject<T> {
  pub fn new() -> Self { Self::with_scheduler(SubjectConfig::default(), crate::scheduler::default_scheduler()) }
}

impl<T: Clone + 'static> AsyncSubject<T> {
  pub fn with_scheduler(config: SubjectConfig<T>, scheduler: SchedulerRef) -> Self {
    Self { subject: Subject::with_scheduler(config, scheduler), last: Rc::default() }
  }

  /// Record `value` as the candidate result. Always `Ok(false)`: nothing is
  /// dispatched until completion.
  pub async fn notify(&self, value: T) -> Result<bool> { self.notify_sync(value) }

  pub fn notify_sync(&self, value: T) -> Result<bool> {
    self.subject.inner.state.borrow().ensure_open()?;
    if let Some(validator) = &self.subject.inner.config.validation {
      validator(&value).map_err(crate::error::RxError::Validation)?;
    }
    *self.last.borrow_mut() = Some(value);
    Ok(false)
  }

  /// The value that completion will deliver.
  pub fn last_value(&self) -> Option<T> { self.last.borrow().clone() }

  /// Deliver the last recorded value, then the completion signal. The
  /// subject is terminal from the start of the call: notifications made
  /// while the final value is being delivered are rejected.
  pub async fn complete(&self) {
    let Some(subscribers) = self.subject.begin_complete() else { return };
    let last = self.last.borrow().clone();
    if let Some(value) = last {
      let mut pending = Vec::new();
      for sub in &subscribers {
        match self.subject.deliver(sub, value.clone()) {
          Step::Done(Ok(())) => {}
          Step::Done(Err(err)) => warn!(subject = %self.subject.id(), observer = %sub.id, error = %err, "final value delivery failed"),
          Step::Suspended(fut) => pending.push(fut),
        }
      }
      for res in join_all(pending).await {
        if let Err(err) = res {
          warn!(subject = %self.subject.id(), error = %err, "final value delivery failed");
        }
      }
    }
    self.subject.finish_complete(subscribers).await;
  }
}

impl<T> Deref for AsyncSubject<T> {
  type Target = Subject<T>;

  fn deref(&self) -> &Subject<T> { &self.subject }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::{
    observer::{Observer, Reaction},
    scheduler::TestScheduler,
    subject::ObserverOptions,
  };

  struct Log(Rc<RefCell<Vec<String>>>);

  impl Observer<i32> for Log {
    fn next(&self, value: i32) -> Reaction {
      self.0.borrow_mut().push(format!("next {value}"));
      Reaction::ok()
    }

    fn complete(&self) -> Reaction {
      self.0.borrow_mut().push("complete".into());
      Reaction::ok()
    }
  }

  fn subject() -> AsyncSubject<i32> {
    TestScheduler::init();
    AsyncSubject::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler))
  }

  #[rxnotify_macro::test]
  async fn only_the_last_value_is_delivered_on_completion() {
    let subject = subject();
    let log = Rc::new(RefCell::new(vec![]));
    subject.add_observer_with(Log(log.clone()), ObserverOptions::new()).unwrap();

    for v in 1..=3 {
      assert!(matches!(subject.notify(v).await, Ok(false)));
    }
    assert!(log.borrow().is_empty());
    subject.complete().await;
    subject.complete().await;
    assert_eq!(*log.borrow(), vec!["next 3".to_string(), "complete".to_string()]);
  }

  #[rxnotify_macro::test]
  async fn completing_without_a_value_only_signals_completion() {
    let subject = subject();
    let nexts = Rc::new(Cell::new(0));
    let n = nexts.clone();
    subject.add_observer(move |_: i32| n.set(n.get() + 1), ObserverOptions::new()).unwrap();
    subject.complete().await;
    assert_eq!(nexts.get(), 0);
    assert!(subject.is_completed());
    assert!(subject.notify_sync(1).is_err());
  }

  #[rxnotify_macro::test]
  async fn notifications_during_completion_are_rejected() {
    let subject = subject();
    let outcome = Rc::new(RefCell::new(None));
    let (s, o) = (subject.clone(), outcome.clone());
    subject
      .add_observer(move |_: i32| *o.borrow_mut() = Some(s.notify_sync(99)), ObserverOptions::new())
      .unwrap();

    subject.notify(3).await.unwrap();
    subject.complete().await;
    assert!(matches!(*outcome.borrow(), Some(Err(crate::error::RxError::Completed))));
    assert_eq!(subject.last_value(), Some(3));
  }

  struct SlowLog(Rc<RefCell<Vec<String>>>);

  impl Observer<i32> for SlowLog {
    fn next(&self, value: i32) -> Reaction {
      let log = self.0.clone();
      Reaction::suspend(async move {
        tokio::task::yield_now().await;
        log.borrow_mut().push(format!("next {value}"));
        Ok(())
      })
    }

    fn complete(&self) -> Reaction {
      self.0.borrow_mut().push("complete".into());
      Reaction::ok()
    }
  }

  #[rxnotify_macro::test]
  async fn overlapping_completions_keep_value_before_signal() {
    let subject = subject();
    let log = Rc::new(RefCell::new(vec![]));
    subject.add_observer_with(SlowLog(log.clone()), ObserverOptions::new()).unwrap();

    subject.notify(3).await.unwrap();
    futures::join!(subject.complete(), subject.complete());
    assert_eq!(*log.borrow(), vec!["next 3".to_string(), "complete".to_string()]);
  }
}
