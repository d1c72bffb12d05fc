use super::{derived, forward_complete, forward_error, forward_next};
use crate::{
  error::{CallbackError, Result},
  observer::{Observer, Reaction},
  subject::{ObserverOptions, Subject},
};

pub struct FilterObserver<T, F> {
  target: Subject<T>,
  predicate: F,
}

impl<T, F> Observer<T> for FilterObserver<T, F>
where
  T: Clone + 'static,
  F: Fn(&T) -> bool,
{
  fn next(&self, value: T) -> Reaction {
    if (self.predicate)(&value) {
      forward_next(&self.target, value)
    } else {
      Reaction::ok()
    }
  }

  fn error(&self, err: &CallbackError) -> Reaction { forward_error(&self.target, err) }

  fn complete(&self) -> Reaction { forward_complete(&self.target) }
}

impl<T: Clone + 'static> Subject<T> {
  /// A subject carrying only the values that satisfy `predicate`.
  pub fn filter<F>(&self, predicate: F) -> Result<Subject<T>>
  where
    F: Fn(&T) -> bool + 'static,
  {
    let target = derived(self);
    self.add_observer_with(FilterObserver { target: target.clone(), predicate }, ObserverOptions::new())?;
    Ok(target)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use crate::{prelude::*, scheduler::TestScheduler};

  #[rxnotify_macro::test]
  async fn keeps_matching_values_and_completion() {
    TestScheduler::init();
    let source = Subject::<i32>::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
    let evens = source.filter(|v| v % 2 == 0).unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    evens.add_observer(move |v: i32| s.borrow_mut().push(v), ObserverOptions::new()).unwrap();

    for v in 0..5 {
      source.notify(v).await.unwrap();
    }
    source.complete().await;
    assert_eq!(*seen.borrow(), vec![0, 2, 4]);
    assert!(evens.is_completed());
  }
}
