//! Subjects: the publish/subscribe primitive and its specializations.
//!
//! A [`Subject`] multicasts each value to its observers in priority order.
//! [`BehaviorSubject`] additionally retains the latest value,
//! [`ReplaySubject`] replays its recent history to late observers and
//! [`AsyncSubject`] delivers only its final value on completion.

mod async_subject;
mod behavior_subject;
mod config;
mod dispatch;
mod replay;
mod replay_subject;
mod subject_core;
mod subject_subscription;
mod subscribers;

pub use async_subject::AsyncSubject;
pub use behavior_subject::BehaviorSubject;
pub use config::*;
pub use replay::ReplayBuffer;
pub use replay_subject::ReplaySubject;
pub(crate) use subject_core::SubjectInner;
pub use subject_core::{Lifecycle, MemoryUsage, Subject};
pub use subject_subscription::SubjectSubscription;
pub use subscribers::ObserverActivity;

/// Registration methods for wrappers that seed new observers with values of
/// their own. `$seed` is a method `fn(&self, ObserverOptions<T>) ->
/// (ObserverOptions<T>, Vec<T>)`.
macro_rules! impl_seeded_registration {
  ($seed:ident) => {
    pub fn add_observer<F, R>(
      &self, f: F, options: $crate::subject::ObserverOptions<T>,
    ) -> $crate::error::Result<$crate::subject::SubjectSubscription<T>>
    where
      F: Fn(T) -> R + 'static,
      R: Into<$crate::observer::Reaction> + 'static,
    {
      self.add_observer_with($crate::observer::FnObserver::new(f), options)
    }

    pub fn add_observer_with<O>(
      &self, observer: O, options: $crate::subject::ObserverOptions<T>,
    ) -> $crate::error::Result<$crate::subject::SubjectSubscription<T>>
    where
      O: $crate::observer::Observer<T> + 'static,
    {
      let (options, seed) = self.$seed(options);
      let target = $crate::observer::ObserverRef::Strong(std::rc::Rc::new(observer));
      self.subject.register(target, None, options, seed)
    }

    pub fn add_shared_observer<O>(
      &self, observer: &std::rc::Rc<O>, options: $crate::subject::ObserverOptions<T>,
    ) -> $crate::error::Result<$crate::subject::SubjectSubscription<T>>
    where
      O: $crate::observer::Observer<T> + 'static,
    {
      let (options, seed) = self.$seed(options);
      let target = self.subject.shared_target(observer, &options);
      let identity = $crate::observer::identity_of(observer);
      self.subject.register(target, Some(identity), options, seed)
    }
  };
}
pub(crate) use impl_seeded_registration;
