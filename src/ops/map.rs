use super::{derived, forward_complete, forward_error, forward_next};
use crate::{
  error::{CallbackError, Result},
  observer::{Observer, Reaction},
  subject::{ObserverOptions, Subject},
};

pub struct MapObserver<U, F> {
  target: Subject<U>,
  map: F,
}

impl<T, U, F> Observer<T> for MapObserver<U, F>
where
  U: Clone + 'static,
  F: Fn(T) -> U,
{
  fn next(&self, value: T) -> Reaction { forward_next(&self.target, (self.map)(value)) }

  fn error(&self, err: &CallbackError) -> Reaction { forward_error(&self.target, err) }

  fn complete(&self) -> Reaction { forward_complete(&self.target) }
}

impl<T: Clone + 'static> Subject<T> {
  /// A subject carrying `f` applied to every value.
  pub fn map<U, F>(&self, f: F) -> Result<Subject<U>>
  where
    U: Clone + 'static,
    F: Fn(T) -> U + 'static,
  {
    let target = derived(self);
    self.add_observer_with(MapObserver { target: target.clone(), map: f }, ObserverOptions::new())?;
    Ok(target)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use crate::{prelude::*, scheduler::TestScheduler};

  #[rxnotify_macro::test]
  fn maps_every_value() {
    TestScheduler::init();
    let source = Subject::<i32>::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
    let labels = source.map(|v| format!("#{v}")).unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    labels.add_observer(move |v: String| s.borrow_mut().push(v), ObserverOptions::new()).unwrap();

    source.notify_sync(1).unwrap();
    source.notify_sync(2).unwrap();
    assert_eq!(*seen.borrow(), vec!["#1".to_string(), "#2".to_string()]);
  }

  #[rxnotify_macro::test]
  async fn errors_reach_the_derived_subject() {
    TestScheduler::init();
    let source = Subject::<i32>::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
    let doubled = source.map(|v| v * 2).unwrap();
    source.error(CallbackError::msg("broken")).await.unwrap();
    assert!(doubled.is_errored());
    assert_eq!(doubled.last_error().map(|e| e.to_string()), Some("broken".to_string()));
  }
}
