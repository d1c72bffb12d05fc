use std::{cell::Cell, fmt, rc::Weak};

use super::subject_core::SubjectInner;
use crate::{id::ObserverId, subscription::Subscription};

/// Subscription handle returned by the `add_*` methods of a subject.
///
/// Holds the subject weakly, so an outstanding handle never keeps a subject
/// alive. Unsubscribing is idempotent and works from inside the observer's
/// own callback. Dropping the handle does not unsubscribe; wrap it in a
/// [`SubscriptionGuard`](crate::subscription::SubscriptionGuard) for that.
pub struct SubjectSubscription<T> {
  subject: Weak<SubjectInner<T>>,
  id: ObserverId,
  closed: Cell<bool>,
}

impl<T> SubjectSubscription<T> {
  pub(crate) fn new(subject: Weak<SubjectInner<T>>, id: ObserverId) -> Self {
    Self { subject, id, closed: Cell::new(false) }
  }

  /// The id of the registered observer, usable with
  /// [`Subject::remove_observer_by_id`](super::Subject::remove_observer_by_id).
  #[inline]
  pub fn id(&self) -> ObserverId { self.id }
}

impl<T> Subscription for SubjectSubscription<T> {
  fn unsubscribe(&self) {
    if self.closed.replace(true) {
      return;
    }
    if let Some(subject) = self.subject.upgrade() {
      subject.remove_subscriber(self.id);
    }
  }

  fn is_closed(&self) -> bool {
    if self.closed.get() {
      return true;
    }
    match self.subject.upgrade() {
      Some(subject) => !subject.state.borrow().registry.contains(self.id),
      None => true,
    }
  }
}

impl<T> fmt::Debug for SubjectSubscription<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubjectSubscription")
      .field("id", &self.id)
      .field("closed", &self.closed.get())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::rc::Rc;

  use crate::{
    prelude::*,
    scheduler::TestScheduler,
    subscription::{Subscription, SubscriptionGuard},
  };

  fn subject() -> Subject<i32> {
    TestScheduler::init();
    Subject::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler))
  }

  #[rxnotify_macro::test]
  fn unsubscribe_is_idempotent() {
    let subject = subject();
    let first = subject.add_observer(|_: i32| (), ObserverOptions::new()).unwrap();
    let _second = subject.add_observer(|_: i32| (), ObserverOptions::new()).unwrap();
    assert_eq!(subject.observer_count(), 2);

    first.unsubscribe();
    first.unsubscribe();
    assert!(first.is_closed());
    assert_eq!(subject.observer_count(), 1);
  }

  #[rxnotify_macro::test]
  fn removal_elsewhere_closes_the_handle() {
    let subject = subject();
    let sub = subject.add_observer(|_: i32| (), ObserverOptions::new()).unwrap();
    assert!(!sub.is_closed());
    assert!(subject.remove_observer_by_id(sub.id()));
    assert!(sub.is_closed());
    sub.unsubscribe();
    assert_eq!(subject.observer_count(), 0);
  }

  #[rxnotify_macro::test]
  fn guard_unsubscribes_on_drop() {
    let subject = subject();
    {
      let _guard = SubscriptionGuard::new(subject.add_observer(|_: i32| (), ObserverOptions::new()).unwrap());
      assert_eq!(subject.observer_count(), 1);
    }
    assert_eq!(subject.observer_count(), 0);
  }

  #[rxnotify_macro::test]
  fn handles_do_not_keep_the_subject_alive() {
    let subject = subject();
    let sub = subject.add_observer(|_: i32| (), ObserverOptions::new()).unwrap();
    drop(subject);
    assert!(sub.is_closed());
    sub.unsubscribe();
  }
}
