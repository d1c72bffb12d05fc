use std::{cell::RefCell, rc::Rc};

use super::{derived, forward_complete, forward_error, forward_next};
use crate::{
  error::{CallbackError, Result},
  observer::{Observer, Reaction},
  subject::{ObserverOptions, Subject},
};

struct CombineLatestState<A, B> {
  a: Option<A>,
  b: Option<B>,
  completed: u8,
}

/// Shared between both sides of a `combine_latest`.
pub struct CombineLatestObserver<A, B, V, F> {
  target: Subject<V>,
  state: RefCell<CombineLatestState<A, B>>,
  binary_op: F,
}

impl<A, B, V, F> CombineLatestObserver<A, B, V, F>
where
  V: Clone + 'static,
  F: Fn(&A, &B) -> V,
{
  fn emit(&self) -> Reaction {
    let combined = {
      let state = self.state.borrow();
      match (&state.a, &state.b) {
        (Some(a), Some(b)) => Some((self.binary_op)(a, b)),
        _ => None,
      }
    };
    match combined {
      Some(value) => forward_next(&self.target, value),
      None => Reaction::ok(),
    }
  }

  fn side_completed(&self) -> Reaction {
    let both = {
      let mut state = self.state.borrow_mut();
      state.completed += 1;
      state.completed == 2
    };
    if both {
      forward_complete(&self.target)
    } else {
      Reaction::ok()
    }
  }
}

pub struct AObserver<A, B, V, F>(Rc<CombineLatestObserver<A, B, V, F>>);

pub struct BObserver<A, B, V, F>(Rc<CombineLatestObserver<A, B, V, F>>);

impl<A, B, V, F> Observer<A> for AObserver<A, B, V, F>
where
  V: Clone + 'static,
  F: Fn(&A, &B) -> V,
{
  fn next(&self, value: A) -> Reaction {
    self.0.state.borrow_mut().a = Some(value);
    self.0.emit()
  }

  fn error(&self, err: &CallbackError) -> Reaction { forward_error(&self.0.target, err) }

  fn complete(&self) -> Reaction { self.0.side_completed() }
}

impl<A, B, V, F> Observer<B> for BObserver<A, B, V, F>
where
  V: Clone + 'static,
  F: Fn(&A, &B) -> V,
{
  fn next(&self, value: B) -> Reaction {
    self.0.state.borrow_mut().b = Some(value);
    self.0.emit()
  }

  fn error(&self, err: &CallbackError) -> Reaction { forward_error(&self.0.target, err) }

  fn complete(&self) -> Reaction { self.0.side_completed() }
}

impl<A: Clone + 'static> Subject<A> {
  /// Emit `binary_op(latest_a, latest_b)` whenever either side emits, once
  /// both have emitted at least once. Completes when both sides complete.
  pub fn combine_latest<B, V, F>(&self, other: &Subject<B>, binary_op: F) -> Result<Subject<V>>
  where
    B: Clone + 'static,
    V: Clone + 'static,
    F: Fn(&A, &B) -> V + 'static,
  {
    let target = derived(self);
    let shared = Rc::new(CombineLatestObserver {
      target: target.clone(),
      state: RefCell::new(CombineLatestState { a: None, b: None, completed: 0 }),
      binary_op,
    });
    self.add_observer_with(AObserver(shared.clone()), ObserverOptions::new())?;
    other.add_observer_with(BObserver(shared), ObserverOptions::new())?;
    Ok(target)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use crate::{prelude::*, scheduler::TestScheduler};

  #[rxnotify_macro::test]
  async fn combines_the_latest_of_both_sides() {
    TestScheduler::init();
    let numbers = Subject::<i32>::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
    let words = Subject::<&'static str>::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
    let combined = numbers.combine_latest(&words, |n, w| format!("{w}{n}")).unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    combined.add_observer(move |v: String| s.borrow_mut().push(v), ObserverOptions::new()).unwrap();

    numbers.notify_sync(1).unwrap();
    assert!(seen.borrow().is_empty());
    words.notify_sync("a").unwrap();
    numbers.notify_sync(2).unwrap();
    words.notify_sync("b").unwrap();
    assert_eq!(*seen.borrow(), vec!["a1", "a2", "b2"]);

    numbers.complete().await;
    assert!(!combined.is_completed());
    words.complete().await;
    assert!(combined.is_completed());
  }
}
