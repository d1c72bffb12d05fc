use std::{cell::Cell, rc::Rc};

use super::{derived, forward_complete, forward_error, forward_next};
use crate::{
  error::{CallbackError, Result},
  observer::{Observer, Reaction},
  subject::{ObserverOptions, Subject},
};

/// Forwards one source into the merged subject. The merged subject
/// completes once every source has completed.
pub struct MergeObserver<T> {
  target: Subject<T>,
  remaining: Rc<Cell<usize>>,
}

impl<T: Clone + 'static> Observer<T> for MergeObserver<T> {
  fn next(&self, value: T) -> Reaction { forward_next(&self.target, value) }

  fn error(&self, err: &CallbackError) -> Reaction { forward_error(&self.target, err) }

  fn complete(&self) -> Reaction {
    let left = self.remaining.get().saturating_sub(1);
    self.remaining.set(left);
    if left == 0 {
      forward_complete(&self.target)
    } else {
      Reaction::ok()
    }
  }
}

impl<T: Clone + 'static> Subject<T> {
  /// Interleave this subject's values with `other`'s.
  pub fn merge(&self, other: &Subject<T>) -> Result<Subject<T>> { Subject::merge_all(&[self, other]) }

  /// Interleave the values of all `sources`, which must not be empty. The
  /// result lives on the first source's scheduler.
  pub fn merge_all(sources: &[&Subject<T>]) -> Result<Subject<T>> {
    let Some(first) = sources.first() else {
      return Err(crate::error::RxError::Validation("merge needs at least one source".into()));
    };
    let target = derived(first);
    let remaining = Rc::new(Cell::new(sources.len()));
    for source in sources {
      let observer = MergeObserver { target: target.clone(), remaining: remaining.clone() };
      source.add_observer_with(observer, ObserverOptions::new())?;
    }
    Ok(target)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use crate::{prelude::*, scheduler::TestScheduler};

  fn source() -> Subject<&'static str> { Subject::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler)) }

  #[rxnotify_macro::test]
  async fn interleaves_and_completes_after_all_sources() {
    TestScheduler::init();
    let (a, b) = (source(), source());
    let merged = a.merge(&b).unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    merged.add_observer(move |v| s.borrow_mut().push(v), ObserverOptions::new()).unwrap();

    a.notify_sync("a1").unwrap();
    b.notify_sync("b1").unwrap();
    a.notify_sync("a2").unwrap();
    assert_eq!(*seen.borrow(), vec!["a1", "b1", "a2"]);

    a.complete().await;
    assert!(!merged.is_completed());
    b.notify_sync("b2").unwrap();
    b.complete().await;
    assert!(merged.is_completed());
    assert_eq!(seen.borrow().len(), 4);
  }

  #[rxnotify_macro::test]
  fn merging_nothing_is_rejected() {
    assert!(Subject::<i32>::merge_all(&[]).is_err());
  }
}
