use std::{cell::RefCell, mem};

use super::{derived, forward_complete, forward_error, forward_next};
use crate::{
  error::{CallbackError, Result},
  observer::{Observer, Reaction},
  subject::{ObserverOptions, Subject},
};

/// Collects values into a `Vec` until `count` is reached, then emits it.
/// On completion any remaining values are emitted first.
pub struct BufferCountObserver<T> {
  target: Subject<Vec<T>>,
  buffer: RefCell<Vec<T>>,
  count: usize,
}

impl<T: Clone + 'static> Observer<T> for BufferCountObserver<T> {
  fn next(&self, value: T) -> Reaction {
    let full = {
      let mut buffer = self.buffer.borrow_mut();
      buffer.push(value);
      (buffer.len() >= self.count).then(|| mem::take(&mut *buffer))
    };
    match full {
      Some(batch) => forward_next(&self.target, batch),
      None => Reaction::ok(),
    }
  }

  fn error(&self, err: &CallbackError) -> Reaction { forward_error(&self.target, err) }

  fn complete(&self) -> Reaction {
    let rest = mem::take(&mut *self.buffer.borrow_mut());
    if !rest.is_empty() {
      if let Reaction::Settled(Err(err)) = forward_next(&self.target, rest) {
        return Reaction::Settled(Err(err));
      }
    }
    forward_complete(&self.target)
  }
}

impl<T: Clone + 'static> Subject<T> {
  /// A subject emitting batches of `count` values. A `count` of zero is
  /// treated as one.
  pub fn buffer_count(&self, count: usize) -> Result<Subject<Vec<T>>> {
    let target = derived(self);
    let observer = BufferCountObserver { target: target.clone(), buffer: RefCell::default(), count: count.max(1) };
    self.add_observer_with(observer, ObserverOptions::new())?;
    Ok(target)
  }
}
