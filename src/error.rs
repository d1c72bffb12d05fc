//! Error taxonomy of the notification engine.
//!
//! Lifecycle and capacity errors are returned straight to the caller of the
//! operation that hit them. Failures raised by user code (filters,
//! transforms, callbacks, listeners) are wrapped in a [`CallbackError`] and
//! then routed by the owning subscriber's
//! [`ErrorHandling`](crate::subject::ErrorHandling) policy.

use std::{any::Any, error::Error as StdError, fmt, sync::Arc};

use crate::id::{ListenerId, ObserverId};

/// Convenient alias used throughout the crate.
pub type Result<T, E = RxError> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RxError {
  /// The subject has completed; it accepts no further values or observers.
  #[error("subject is completed")]
  Completed,

  /// The subject or emitter has been disposed.
  #[error("already disposed")]
  Disposed,

  #[error("maximum number of observers ({max}) exceeded")]
  MaxObserversExceeded { max: usize },

  /// Backpressure: too many notifications are in flight. The caller should
  /// retry later, nothing was queued.
  #[error("concurrency limit reached ({limit} notifications in flight)")]
  ConcurrencyLimit { limit: usize },

  /// Backpressure: the pause queue of an event key is full.
  #[error("event queue for `{event}` is full (capacity {capacity})")]
  EventQueueFull { event: String, capacity: usize },

  #[error("validation failed: {0}")]
  Validation(String),

  #[error("filter of {observer} failed: {cause}")]
  Filter { observer: ObserverId, cause: CallbackError },

  #[error("transform of {observer} failed: {cause}")]
  Transform { observer: ObserverId, cause: CallbackError },

  #[error("{observer} failed: {cause}")]
  Execution { observer: ObserverId, cause: CallbackError },

  #[error("{listener} for `{event}` failed: {cause}")]
  Listener { event: String, listener: ListenerId, cause: CallbackError },

  /// An error pushed into a subject by its producer via `error()`.
  #[error("{0}")]
  Signalled(CallbackError),

  /// A latest-value subject was read before any value was set.
  #[error("no value has been set")]
  NoValue,
}

impl RxError {
  /// The user-level failure behind a pipeline error, if any.
  pub fn cause(&self) -> Option<&CallbackError> {
    match self {
      RxError::Filter { cause, .. }
      | RxError::Transform { cause, .. }
      | RxError::Execution { cause, .. }
      | RxError::Listener { cause, .. }
      | RxError::Signalled(cause) => Some(cause),
      _ => None,
    }
  }

  /// Lifecycle and capacity errors are raised to the caller and never routed
  /// through an observer's error policy.
  pub fn is_backpressure(&self) -> bool {
    matches!(self, RxError::ConcurrencyLimit { .. } | RxError::EventQueueFull { .. })
  }
}

/// A failure raised by user code.
///
/// Type-erased and cheap to clone so one failure can be handed to several
/// observers. Any `std::error::Error` converts into it with `?`.
#[derive(Clone)]
pub struct CallbackError(Arc<dyn StdError + Send + Sync + 'static>);

impl CallbackError {
  pub fn new<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Self(Arc::new(err))
  }

  /// Build an error from a plain message.
  pub fn msg(message: impl Into<String>) -> Self { Self(Arc::new(Message(message.into()))) }

  /// Convert a caught panic payload.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "callback panicked".to_string()
    };
    Self(Arc::new(Panicked(message)))
  }

  /// Whether this error came from a caught panic.
  pub fn is_panic(&self) -> bool { self.0.is::<Panicked>() }

  pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> { self.0.downcast_ref::<E>() }

  pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) { &*self.0 }
}

impl<E> From<E> for CallbackError
where
  E: StdError + Send + Sync + 'static,
{
  fn from(err: E) -> Self { Self::new(err) }
}

impl fmt::Debug for CallbackError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(&*self.0, f) }
}

impl fmt::Display for CallbackError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&*self.0, f) }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl StdError for Message {}

#[derive(Debug)]
struct Panicked(String);

impl fmt::Display for Panicked {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "panicked: {}", self.0) }
}

impl StdError for Panicked {}
