//! Operators deriving a new subject from existing ones.
//!
//! Each operator registers a forwarding observer on its source(s) and
//! returns the derived subject, which shares the source's scheduler. Values
//! are forwarded synchronously; errors and completion are forwarded as
//! suspended reactions so the derived subject's own observers are awaited.

pub mod buffer_count;
pub mod combine_latest;
pub mod filter;
pub mod map;
pub mod merge;

use crate::{
  error::{CallbackError, RxError},
  observer::Reaction,
  subject::{Subject, SubjectConfig},
};

/// A fresh subject on the same scheduler as `source`.
pub(crate) fn derived<S: Clone + 'static, U: Clone + 'static>(source: &Subject<S>) -> Subject<U> {
  Subject::with_scheduler(SubjectConfig::default(), source.scheduler().clone())
}

/// Push a value downstream. A closed downstream swallows it.
pub(crate) fn forward_next<U: Clone + 'static>(target: &Subject<U>, value: U) -> Reaction {
  match target.notify_sync(value) {
    Ok(_) | Err(RxError::Completed | RxError::Disposed) => Reaction::ok(),
    Err(err) => Reaction::err(err),
  }
}

pub(crate) fn forward_error<U: Clone + 'static>(target: &Subject<U>, err: &CallbackError) -> Reaction {
  let target = target.clone();
  let err = err.clone();
  Reaction::suspend(async move {
    match target.error(err).await {
      Ok(()) | Err(RxError::Completed | RxError::Disposed) => Ok(()),
      Err(err) => Err(CallbackError::new(err)),
    }
  })
}

pub(crate) fn forward_complete<U: Clone + 'static>(target: &Subject<U>) -> Reaction {
  let target = target.clone();
  Reaction::suspend(async move {
    target.complete().await;
    Ok(())
  })
}
