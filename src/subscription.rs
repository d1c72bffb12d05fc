//! Unsubscribe capabilities.

/// Handle returned by a registration that allows deregistering later.
///
/// `unsubscribe` is idempotent: calling it again is a no-op and never
/// affects other registrations.
pub trait Subscription {
  fn unsubscribe(&self);

  fn is_closed(&self) -> bool;
}

/// An RAII guard around a subscription. When this structure is dropped
/// (falls out of scope), the subscription is unsubscribed.
///
/// If you want to drop it immediately, wrap it in its own scope.
#[derive(Debug)]
#[must_use]
pub struct SubscriptionGuard<S: Subscription>(S);

impl<S: Subscription> SubscriptionGuard<S> {
  pub fn new(subscription: S) -> Self { SubscriptionGuard(subscription) }

  pub fn get(&self) -> &S { &self.0 }
}

impl<S: Subscription> Drop for SubscriptionGuard<S> {
  #[inline]
  fn drop(&mut self) { self.0.unsubscribe() }
}
