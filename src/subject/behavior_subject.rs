use std::{cell::RefCell, ops::Deref, rc::Rc};

use super::{impl_seeded_registration, ObserverOptions, Subject, SubjectConfig};
use crate::{
  error::{Result, RxError},
  scheduler::SchedulerRef,
};

/// A subject that remembers its latest value.
///
/// Every new observer receives the current value (if any) shortly after
/// registering; registration itself never delivers inline.
#[derive(Clone)]
pub struct BehaviorSubject<T> {
  pub(crate) subject: Subject<T>,
  value: Rc<RefCell<Option<T>>>,
}

#[cfg(feature = "tokio-scheduler")]
impl<T: Clone + 'static> BehaviorSubject<T> {
  pub fn new(initial: T) -> Self {
    Self::with_scheduler(Some(initial), SubjectConfig::default(), crate::scheduler::default_scheduler())
  }

  /// A subject without a value yet; [`value`](Self::value) fails until the
  /// first notification.
  pub fn empty() -> Self {
    Self::with_scheduler(None, SubjectConfig::default(), crate::scheduler::default_scheduler())
  }
}

impl<T: Clone + 'static> BehaviorSubject<T> {
  pub fn with_scheduler(initial: Option<T>, config: SubjectConfig<T>, scheduler: SchedulerRef) -> Self {
    Self { subject: Subject::with_scheduler(config, scheduler), value: Rc::new(RefCell::new(initial)) }
  }

  /// The latest value, or [`RxError::NoValue`] if none was ever set.
  pub fn value(&self) -> Result<T> { self.value.borrow().clone().ok_or(RxError::NoValue) }

  pub fn has_value(&self) -> bool { self.value.borrow().is_some() }

  /// Store `value` as the current one, then notify.
  pub async fn notify(&self, value: T) -> Result<bool> {
    self.subject.notify_with(value, |v| self.store(v)).await
  }

  pub fn notify_sync(&self, value: T) -> Result<bool> { self.subject.notify_sync_with(value, |v| self.store(v)) }

  fn store(&self, value: &T) { *self.value.borrow_mut() = Some(value.clone()); }

  fn seed(&self, options: ObserverOptions<T>) -> (ObserverOptions<T>, Vec<T>) {
    let current = self.value.borrow().clone();
    (options, current.into_iter().collect())
  }

  impl_seeded_registration!(seed);
}

impl<T> Deref for BehaviorSubject<T> {
  type Target = Subject<T>;

  fn deref(&self) -> &Subject<T> { &self.subject }
}

#[cfg(test)]
mod tests {
  use std::rc::Rc;

  use super::*;
  use crate::scheduler::TestScheduler;

  fn behavior(initial: Option<i32>) -> BehaviorSubject<i32> {
    TestScheduler::init();
    BehaviorSubject::with_scheduler(initial, SubjectConfig::default(), Rc::new(TestScheduler))
  }

  #[rxnotify_macro::test]
  fn reading_before_a_value_is_an_error() {
    let subject = behavior(None);
    assert!(matches!(subject.value(), Err(RxError::NoValue)));
    subject.notify_sync(3).unwrap();
    assert_eq!(subject.value().unwrap(), 3);
  }

  #[rxnotify_macro::test]
  fn new_observers_get_the_current_value_asynchronously() {
    let subject = behavior(Some(1));
    subject.notify_sync(2).unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    subject
      .add_observer(move |v: i32| s.borrow_mut().push(v), ObserverOptions::new())
      .unwrap();
    assert!(seen.borrow().is_empty());
    TestScheduler::flush();
    assert_eq!(*seen.borrow(), vec![2]);

    subject.notify_sync(3).unwrap();
    assert_eq!(*seen.borrow(), vec![2, 3]);
  }

  #[rxnotify_macro::test]
  fn empty_subject_seeds_nothing() {
    let subject = behavior(None);
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    subject
      .add_observer(move |v: i32| s.borrow_mut().push(v), ObserverOptions::new())
      .unwrap();
    TestScheduler::flush();
    assert!(seen.borrow().is_empty());
  }

  #[rxnotify_macro::test]
  fn rejected_values_are_not_retained() {
    TestScheduler::init();
    let config = SubjectConfig::builder().validator(|v: &i32| if *v < 10 { Ok(()) } else { Err("too big".into()) }).build();
    let subject = BehaviorSubject::with_scheduler(Some(0), config, Rc::new(TestScheduler));
    assert!(subject.notify_sync(11).is_err());
    assert_eq!(subject.value().unwrap(), 0);

    subject.dispose();
    assert!(subject.notify_sync(5).is_err());
    assert_eq!(subject.value().unwrap(), 0);
  }
}
