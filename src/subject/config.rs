//! Subject and observer configuration.
//!
//! Both configs are plain structs. [`SubjectConfigBuilder::build`] merges the
//! fields that were set with the documented defaults; nothing is looked up
//! dynamically afterwards.

use std::{fmt, rc::Rc, time::Duration};

use super::Subject;
use crate::error::{CallbackError, RxError};

/// Default cap on registered observers.
pub const DEFAULT_MAX_OBSERVERS: usize = 100;

/// Default interval of the dead-observer sweep.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(30);

/// Default replay history length.
pub const DEFAULT_REPLAY_BUFFER_SIZE: usize = 10;

/// Default number of notifications allowed in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Predicate run on every notified value; `Err` carries the reason.
pub type Validator<T> = Rc<dyn Fn(&T) -> Result<(), String>>;

/// Subscriber-level error handler: `(error, value, subject)`.
pub type ErrorHandler<T> = Rc<dyn Fn(&RxError, Option<&T>, &Subject<T>)>;

pub type FilterFn<T> = Rc<dyn Fn(&T) -> bool>;

pub type TransformFn<T> = Rc<dyn Fn(T) -> Result<T, CallbackError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
  /// Arm a periodic sweep of dead weak observers.
  pub enabled: bool,
  pub gc_interval: Duration,
  /// Hold every `Rc` observer weakly, not only those that ask for it.
  pub weak_references: bool,
}

impl Default for MemoryConfig {
  fn default() -> Self { Self { enabled: false, gc_interval: DEFAULT_GC_INTERVAL, weak_references: false } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
  pub enabled: bool,
  pub buffer_size: usize,
}

impl Default for ReplayConfig {
  fn default() -> Self { Self { enabled: false, buffer_size: DEFAULT_REPLAY_BUFFER_SIZE } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyConfig {
  pub enabled: bool,
  pub max_concurrent: usize,
}

impl Default for ConcurrencyConfig {
  fn default() -> Self { Self { enabled: false, max_concurrent: DEFAULT_MAX_CONCURRENT } }
}

/// Lifecycle callbacks fired by the subject itself.
pub struct SubjectHooks<T> {
  pub before_notify: Option<Rc<dyn Fn(&T)>>,
  /// Receives the value and whether the notification succeeded.
  pub after_notify: Option<Rc<dyn Fn(&T, bool)>>,
  pub on_complete: Option<Rc<dyn Fn()>>,
  pub on_error: Option<Rc<dyn Fn(&CallbackError)>>,
}

impl<T> Default for SubjectHooks<T> {
  fn default() -> Self { Self { before_notify: None, after_notify: None, on_complete: None, on_error: None } }
}

impl<T> Clone for SubjectHooks<T> {
  fn clone(&self) -> Self {
    Self {
      before_notify: self.before_notify.clone(),
      after_notify: self.after_notify.clone(),
      on_complete: self.on_complete.clone(),
      on_error: self.on_error.clone(),
    }
  }
}

/// Subject configuration.
pub struct SubjectConfig<T> {
  pub max_observers: usize,
  /// Dispose right after `complete()` finishes.
  pub auto_complete: bool,
  /// Surface the first `Throw` failure of a dispatch round to the caller.
  pub error_propagation: bool,
  pub memory_management: MemoryConfig,
  pub replay: ReplayConfig,
  pub concurrency: ConcurrencyConfig,
  pub validation: Option<Validator<T>>,
  pub hooks: SubjectHooks<T>,
}

impl<T> Default for SubjectConfig<T> {
  fn default() -> Self {
    Self {
      max_observers: DEFAULT_MAX_OBSERVERS,
      auto_complete: false,
      error_propagation: true,
      memory_management: MemoryConfig::default(),
      replay: ReplayConfig::default(),
      concurrency: ConcurrencyConfig::default(),
      validation: None,
      hooks: SubjectHooks::default(),
    }
  }
}

impl<T> Clone for SubjectConfig<T> {
  fn clone(&self) -> Self {
    Self {
      max_observers: self.max_observers,
      auto_complete: self.auto_complete,
      error_propagation: self.error_propagation,
      memory_management: self.memory_management,
      replay: self.replay,
      concurrency: self.concurrency,
      validation: self.validation.clone(),
      hooks: self.hooks.clone(),
    }
  }
}

impl<T> fmt::Debug for SubjectConfig<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubjectConfig")
      .field("max_observers", &self.max_observers)
      .field("auto_complete", &self.auto_complete)
      .field("error_propagation", &self.error_propagation)
      .field("memory_management", &self.memory_management)
      .field("replay", &self.replay)
      .field("concurrency", &self.concurrency)
      .field("validation", &self.validation.is_some())
      .finish_non_exhaustive()
  }
}

impl<T> SubjectConfig<T> {
  #[must_use]
  pub fn builder() -> SubjectConfigBuilder<T> { SubjectConfigBuilder::default() }

  /// A config with replay enabled and the given history length.
  #[must_use]
  pub fn with_replay(buffer_size: usize) -> Self {
    Self { replay: ReplayConfig { enabled: true, buffer_size }, ..Default::default() }
  }

  /// The in-flight limit, when concurrency limiting is on.
  pub(crate) fn concurrency_limit(&self) -> Option<usize> {
    self.concurrency.enabled.then_some(self.concurrency.max_concurrent)
  }
}

/// Builder for [`SubjectConfig`].
pub struct SubjectConfigBuilder<T> {
  max_observers: Option<usize>,
  auto_complete: Option<bool>,
  error_propagation: Option<bool>,
  memory_management: Option<MemoryConfig>,
  replay: Option<ReplayConfig>,
  concurrency: Option<ConcurrencyConfig>,
  validation: Option<Validator<T>>,
  hooks: SubjectHooks<T>,
}

impl<T> Default for SubjectConfigBuilder<T> {
  fn default() -> Self {
    Self {
      max_observers: None,
      auto_complete: None,
      error_propagation: None,
      memory_management: None,
      replay: None,
      concurrency: None,
      validation: None,
      hooks: SubjectHooks::default(),
    }
  }
}

impl<T> SubjectConfigBuilder<T> {
  #[must_use]
  pub fn max_observers(mut self, max: usize) -> Self {
    self.max_observers = Some(max);
    self
  }

  #[must_use]
  pub fn auto_complete(mut self, enabled: bool) -> Self {
    self.auto_complete = Some(enabled);
    self
  }

  #[must_use]
  pub fn error_propagation(mut self, enabled: bool) -> Self {
    self.error_propagation = Some(enabled);
    self
  }

  #[must_use]
  pub fn memory_management(mut self, memory: MemoryConfig) -> Self {
    self.memory_management = Some(memory);
    self
  }

  /// Enable replay with the given history length.
  #[must_use]
  pub fn replay(mut self, buffer_size: usize) -> Self {
    self.replay = Some(ReplayConfig { enabled: true, buffer_size });
    self
  }

  /// Allow at most `max_concurrent` notifications in flight.
  #[must_use]
  pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
    self.concurrency = Some(ConcurrencyConfig { enabled: true, max_concurrent });
    self
  }

  #[must_use]
  pub fn validator(mut self, validator: impl Fn(&T) -> Result<(), String> + 'static) -> Self {
    self.validation = Some(Rc::new(validator));
    self
  }

  #[must_use]
  pub fn before_notify(mut self, hook: impl Fn(&T) + 'static) -> Self {
    self.hooks.before_notify = Some(Rc::new(hook));
    self
  }

  #[must_use]
  pub fn after_notify(mut self, hook: impl Fn(&T, bool) + 'static) -> Self {
    self.hooks.after_notify = Some(Rc::new(hook));
    self
  }

  #[must_use]
  pub fn on_complete(mut self, hook: impl Fn() + 'static) -> Self {
    self.hooks.on_complete = Some(Rc::new(hook));
    self
  }

  #[must_use]
  pub fn on_error(mut self, hook: impl Fn(&CallbackError) + 'static) -> Self {
    self.hooks.on_error = Some(Rc::new(hook));
    self
  }

  /// Builds the configuration, filling unset fields with defaults.
  #[must_use]
  pub fn build(self) -> SubjectConfig<T> {
    SubjectConfig {
      max_observers: self.max_observers.unwrap_or(DEFAULT_MAX_OBSERVERS),
      auto_complete: self.auto_complete.unwrap_or(false),
      error_propagation: self.error_propagation.unwrap_or(true),
      memory_management: self.memory_management.unwrap_or_default(),
      replay: self.replay.unwrap_or_default(),
      concurrency: self.concurrency.unwrap_or_default(),
      validation: self.validation,
      hooks: self.hooks,
    }
  }
}

// ============================================================================
// Observer options
// ============================================================================

/// Dispatch priority. Lower sorts first: `High` fires before `Normal`,
/// which fires before `Low`. Ties keep registration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
  High,
  #[default]
  Normal,
  Low,
}

/// What happens when one observer's pipeline fails.
pub enum ErrorHandling<T> {
  /// Hand the failure to the notify-level join (and `error()` signals to the
  /// observer's own `error` slot).
  Throw,
  /// Drop the failure.
  Silent,
  /// Hand the failure to this handler instead.
  Callback(ErrorHandler<T>),
}

impl<T> Default for ErrorHandling<T> {
  fn default() -> Self { ErrorHandling::Throw }
}

impl<T> Clone for ErrorHandling<T> {
  fn clone(&self) -> Self {
    match self {
      ErrorHandling::Throw => ErrorHandling::Throw,
      ErrorHandling::Silent => ErrorHandling::Silent,
      ErrorHandling::Callback(h) => ErrorHandling::Callback(h.clone()),
    }
  }
}

impl<T> fmt::Debug for ErrorHandling<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorHandling::Throw => f.write_str("Throw"),
      ErrorHandling::Silent => f.write_str("Silent"),
      ErrorHandling::Callback(_) => f.write_str("Callback(..)"),
    }
  }
}

/// Per-observer dispatch options.
///
/// ```rust
/// use std::time::Duration;
///
/// use rxnotify::prelude::*;
///
/// let options = ObserverOptions::<i32>::new()
///   .priority(Priority::High)
///   .filter(|v| *v > 0)
///   .throttle(Duration::from_millis(50));
/// ```
pub struct ObserverOptions<T> {
  pub(crate) priority: Priority,
  pub(crate) once: bool,
  pub(crate) filter: Option<FilterFn<T>>,
  pub(crate) transform: Option<TransformFn<T>>,
  pub(crate) debounce: Option<Duration>,
  pub(crate) throttle: Option<Duration>,
  pub(crate) buffering: Option<usize>,
  pub(crate) replay: bool,
  pub(crate) weak_reference: bool,
  pub(crate) error_handling: ErrorHandling<T>,
}

impl<T> Default for ObserverOptions<T> {
  fn default() -> Self {
    Self {
      priority: Priority::Normal,
      once: false,
      filter: None,
      transform: None,
      debounce: None,
      throttle: None,
      buffering: None,
      replay: false,
      weak_reference: false,
      error_handling: ErrorHandling::Throw,
    }
  }
}

impl<T> Clone for ObserverOptions<T> {
  fn clone(&self) -> Self {
    Self {
      priority: self.priority,
      once: self.once,
      filter: self.filter.clone(),
      transform: self.transform.clone(),
      debounce: self.debounce,
      throttle: self.throttle,
      buffering: self.buffering,
      replay: self.replay,
      weak_reference: self.weak_reference,
      error_handling: self.error_handling.clone(),
    }
  }
}

impl<T> fmt::Debug for ObserverOptions<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ObserverOptions")
      .field("priority", &self.priority)
      .field("once", &self.once)
      .field("filter", &self.filter.is_some())
      .field("transform", &self.transform.is_some())
      .field("debounce", &self.debounce)
      .field("throttle", &self.throttle)
      .field("buffering", &self.buffering)
      .field("replay", &self.replay)
      .field("weak_reference", &self.weak_reference)
      .field("error_handling", &self.error_handling)
      .finish()
  }
}

impl<T> ObserverOptions<T> {
  pub fn new() -> Self { Self::default() }

  #[must_use]
  pub fn priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  /// Fire at most once, then unregister.
  #[must_use]
  pub fn once(mut self) -> Self {
    self.once = true;
    self
  }

  #[must_use]
  pub fn filter(mut self, filter: impl Fn(&T) -> bool + 'static) -> Self {
    self.filter = Some(Rc::new(filter));
    self
  }

  #[must_use]
  pub fn transform(mut self, transform: impl Fn(T) -> Result<T, CallbackError> + 'static) -> Self {
    self.transform = Some(Rc::new(transform));
    self
  }

  /// Collapse bursts: fire once with the latest value after `delay` of quiet.
  #[must_use]
  pub fn debounce(mut self, delay: Duration) -> Self {
    self.debounce = Some(delay);
    self
  }

  /// Fire at most once per `window`, keeping the first value.
  #[must_use]
  pub fn throttle(mut self, window: Duration) -> Self {
    self.throttle = Some(window);
    self
  }

  /// Keep the last `size` values delivered to this observer.
  #[must_use]
  pub fn buffering(mut self, size: usize) -> Self {
    self.buffering = Some(size);
    self
  }

  /// Receive the subject's replay history on subscription.
  #[must_use]
  pub fn replay(mut self) -> Self {
    self.replay = true;
    self
  }

  /// Hold a shared observer weakly.
  #[must_use]
  pub fn weak_reference(mut self) -> Self {
    self.weak_reference = true;
    self
  }

  #[must_use]
  pub fn error_handling(mut self, policy: ErrorHandling<T>) -> Self {
    self.error_handling = policy;
    self
  }

  /// Shorthand for `error_handling(ErrorHandling::Callback(..))`.
  #[must_use]
  pub fn on_error(mut self, handler: impl Fn(&RxError, Option<&T>, &Subject<T>) + 'static) -> Self {
    self.error_handling = ErrorHandling::Callback(Rc::new(handler));
    self
  }
}
