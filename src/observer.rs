//! Observer trait and implementations
//!
//! The Observer trait defines the consumer side of a subject. It provides
//! three methods: `next` (for values), `error` (for producer errors) and
//! `complete` (the completion sentinel). Each returns a [`Reaction`], which
//! is either already settled or a future the dispatcher has to await.

use std::{
  future::Future,
  panic::{catch_unwind, AssertUnwindSafe},
  rc::{Rc, Weak},
};

use futures::{future::LocalBoxFuture, FutureExt};

use crate::error::CallbackError;

// ============================================================================
// Reaction
// ============================================================================

/// Outcome of handing one signal to an observer.
pub enum Reaction {
  /// The observer finished synchronously.
  Settled(Result<(), CallbackError>),
  /// The observer suspended; the dispatcher awaits (or spawns) the future.
  Suspended(LocalBoxFuture<'static, Result<(), CallbackError>>),
}

impl Reaction {
  #[inline]
  pub fn ok() -> Self { Reaction::Settled(Ok(())) }

  #[inline]
  pub fn err(err: impl Into<CallbackError>) -> Self { Reaction::Settled(Err(err.into())) }

  /// Wrap an asynchronous callback body.
  pub fn suspend<F>(future: F) -> Self
  where
    F: Future<Output = Result<(), CallbackError>> + 'static,
  {
    Reaction::Suspended(Box::pin(future))
  }

  #[inline]
  pub fn is_suspended(&self) -> bool { matches!(self, Reaction::Suspended(_)) }

  /// Resolve the reaction, awaiting it if it suspended.
  pub async fn settle(self) -> Result<(), CallbackError> {
    match self {
      Reaction::Settled(res) => res,
      Reaction::Suspended(fut) => fut.await,
    }
  }
}

impl From<()> for Reaction {
  #[inline]
  fn from(_: ()) -> Self { Reaction::ok() }
}

impl From<Result<(), CallbackError>> for Reaction {
  #[inline]
  fn from(res: Result<(), CallbackError>) -> Self { Reaction::Settled(res) }
}

// ============================================================================
// Observer Trait
// ============================================================================

/// Observer trait: the consumer of notifications.
///
/// Observers are shared behind `Rc`, so every method takes `&self`; use
/// interior mutability for state.
pub trait Observer<T> {
  /// Receive the next value.
  fn next(&self, value: T) -> Reaction;

  /// Receive an error signalled by the producer.
  fn error(&self, _err: &CallbackError) -> Reaction { Reaction::ok() }

  /// Receive the completion sentinel. No values follow it.
  fn complete(&self) -> Reaction { Reaction::ok() }
}

/// Adapts a closure into an [`Observer`] that only handles values.
pub struct FnObserver<F>(F);

impl<F> FnObserver<F> {
  pub fn new(f: F) -> Self { Self(f) }
}

impl<T, F, R> Observer<T> for FnObserver<F>
where
  F: Fn(T) -> R,
  R: Into<Reaction>,
{
  #[inline]
  fn next(&self, value: T) -> Reaction { (self.0)(value).into() }
}

/// Build a shareable closure observer, e.g. for
/// [`Subject::add_shared_observer`](crate::subject::Subject::add_shared_observer).
pub fn observer_fn<T, F, R>(f: F) -> Rc<FnObserver<F>>
where
  F: Fn(T) -> R,
  R: Into<Reaction>,
{
  Rc::new(FnObserver(f))
}

// ============================================================================
// Strong / weak observer references
// ============================================================================

/// How a subject holds on to an observer.
pub(crate) enum ObserverRef<T> {
  Strong(Rc<dyn Observer<T>>),
  Weak(Weak<dyn Observer<T>>),
}

impl<T> ObserverRef<T> {
  /// Resolve to a usable observer; `None` means the referent is gone.
  pub(crate) fn upgrade(&self) -> Option<Rc<dyn Observer<T>>> {
    match self {
      ObserverRef::Strong(rc) => Some(rc.clone()),
      ObserverRef::Weak(weak) => weak.upgrade(),
    }
  }

  pub(crate) fn is_weak(&self) -> bool { matches!(self, ObserverRef::Weak(_)) }

  pub(crate) fn is_alive(&self) -> bool {
    match self {
      ObserverRef::Strong(_) => true,
      ObserverRef::Weak(weak) => weak.strong_count() > 0,
    }
  }
}

/// Invoke user code, turning a panic (at call time or while the suspended
/// future is polled) into a failed reaction.
pub(crate) fn guarded(call: impl FnOnce() -> Reaction) -> Reaction {
  match catch_unwind(AssertUnwindSafe(call)) {
    Ok(Reaction::Suspended(fut)) => Reaction::Suspended(Box::pin(async move {
      AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(CallbackError::from_panic(payload)))
    })),
    Ok(settled) => settled,
    Err(payload) => Reaction::Settled(Err(CallbackError::from_panic(payload))),
  }
}

/// Address of an observer allocation, used to find it again by identity.
pub(crate) fn identity_of<O: ?Sized>(rc: &Rc<O>) -> usize { Rc::as_ptr(rc) as *const () as usize }

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;

  #[rxnotify_macro::test]
  fn closures_convert_into_reactions() {
    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    let unit = FnObserver::new(move |v: i32| s.borrow_mut().push(v));
    assert!(matches!(unit.next(1), Reaction::Settled(Ok(()))));

    let failing = FnObserver::new(|_: i32| -> Result<(), CallbackError> { Err(CallbackError::msg("no")) });
    assert!(matches!(failing.next(2), Reaction::Settled(Err(_))));

    let suspending = FnObserver::new(|v: i32| Reaction::suspend(async move { if v > 0 { Ok(()) } else { Err(CallbackError::msg("neg")) } }));
    assert!(suspending.next(3).is_suspended());
    assert!(futures::executor::block_on(suspending.next(-1).settle()).is_err());

    assert_eq!(*seen.borrow(), vec![1]);
    assert!(matches!(unit.complete(), Reaction::Settled(Ok(()))));
  }

  #[rxnotify_macro::test]
  fn weak_refs_report_gone_referents() {
    let observer = observer_fn(|_: i32| ());
    let as_dyn: Rc<dyn Observer<i32>> = observer.clone();
    let weak = ObserverRef::Weak(Rc::downgrade(&as_dyn));
    drop(as_dyn);
    assert!(weak.is_alive());
    assert!(weak.upgrade().is_some());
    drop(observer);
    assert!(!weak.is_alive());
    assert!(weak.upgrade().is_none());
  }

  #[rxnotify_macro::test]
  fn guarded_turns_panics_into_errors() {
    let res = guarded(|| panic!("boom"));
    match res {
      Reaction::Settled(Err(err)) => assert!(err.is_panic()),
      _ => panic!("expected a settled failure"),
    }

    let res = guarded(|| Reaction::suspend(async { panic!("later") }));
    let err = futures::executor::block_on(res.settle()).unwrap_err();
    assert!(err.is_panic());
    assert_eq!(err.to_string(), "panicked: later");
  }
}
