use std::{
  cell::RefCell,
  fmt,
  mem,
  panic::{catch_unwind, AssertUnwindSafe},
  rc::Rc,
  time::{Duration, Instant},
};

use futures::future::join_all;
use tracing::{debug, trace, warn};

use super::{
  config::{ErrorHandling, ObserverOptions, SubjectConfig},
  dispatch::Step,
  replay::ReplayBuffer,
  subject_subscription::SubjectSubscription,
  subscribers::{ObserverActivity, Registry, Subscriber},
};
use crate::{
  error::{CallbackError, Result, RxError},
  id::{ObserverId, SubjectId},
  metrics::Metrics,
  observer::{guarded, identity_of, FnObserver, Observer, ObserverRef, Reaction},
  scheduler::{SchedulerRef, TaskHandle},
};

/// Lifecycle of a subject. `Completed` and `Disposed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Active,
  Completed,
  Disposed,
}

/// Approximate footprint of a subject, for diagnostics only.
///
/// Sizes are computed from `size_of` of the stored records and values; heap
/// data owned by the values themselves is not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
  pub observers: usize,
  pub weak_observers: usize,
  pub replay_len: usize,
  pub buffered_values: usize,
  pub estimated_bytes: usize,
}

pub(crate) struct SubjectState<T> {
  pub(crate) lifecycle: Lifecycle,
  pub(crate) errored: bool,
  pub(crate) last_error: Option<CallbackError>,
  pub(crate) registry: Registry<T>,
  pub(crate) replay: Option<ReplayBuffer<T>>,
  pub(crate) in_flight: usize,
  pub(crate) metrics: Metrics,
  pub(crate) last_access: Duration,
  pub(crate) gc_timer: Option<TaskHandle>,
}

impl<T> SubjectState<T> {
  pub(crate) fn ensure_open(&self) -> Result<()> {
    match self.lifecycle {
      Lifecycle::Active => Ok(()),
      Lifecycle::Completed => Err(RxError::Completed),
      Lifecycle::Disposed => Err(RxError::Disposed),
    }
  }
}

pub(crate) struct SubjectInner<T> {
  pub(crate) id: SubjectId,
  pub(crate) config: SubjectConfig<T>,
  pub(crate) scheduler: SchedulerRef,
  pub(crate) state: RefCell<SubjectState<T>>,
}

impl<T> SubjectInner<T> {
  /// Deactivate and unlink a subscriber. Safe to call from inside its own
  /// callback; rounds already running keep their snapshot.
  pub(crate) fn remove_subscriber(&self, id: ObserverId) -> bool {
    let removed = self.state.borrow_mut().registry.remove(id);
    match removed {
      Some(sub) => {
        sub.deactivate();
        self.touch();
        trace!(subject = %self.id, observer = %id, "observer removed");
        true
      }
      None => false,
    }
  }

  pub(crate) fn record_execution(&self, elapsed: Duration) {
    self.state.borrow_mut().metrics.record_execution(elapsed);
  }

  pub(crate) fn touch(&self) {
    let now = self.scheduler.now();
    self.state.borrow_mut().last_access = now;
  }

  pub(crate) fn lifecycle(&self) -> Lifecycle { self.state.borrow().lifecycle }

  pub(crate) fn observer_count(&self) -> usize { self.state.borrow().registry.len() }

  pub(crate) fn idle_for(&self) -> Duration {
    let last = self.state.borrow().last_access;
    self.scheduler.now().saturating_sub(last)
  }

  pub(crate) fn collect_dead_observers(&self) -> usize {
    let removed = self.state.borrow_mut().registry.remove_dead();
    if removed > 0 {
      debug!(subject = %self.id, removed, "collected dead observers");
    }
    removed
  }

  pub(crate) fn memory_usage(&self) -> MemoryUsage {
    let state = self.state.borrow();
    let observers = state.registry.len();
    let weak_observers = state.registry.iter().filter(|s| s.target.is_weak()).count();
    let replay_len = state.replay.as_ref().map_or(0, ReplayBuffer::len);
    let buffered_values: usize = state.registry.iter().map(|s| s.state.borrow().buffer.len()).sum();
    let estimated_bytes = mem::size_of::<Self>()
      + observers * mem::size_of::<Subscriber<T>>()
      + (replay_len + buffered_values) * mem::size_of::<T>();
    MemoryUsage { observers, weak_observers, replay_len, buffered_values, estimated_bytes }
  }

  /// Returns whether this call performed the disposal.
  pub(crate) fn dispose(&self) -> bool {
    let (subscribers, gc_timer) = {
      let mut state = self.state.borrow_mut();
      if state.lifecycle == Lifecycle::Disposed {
        return false;
      }
      state.lifecycle = Lifecycle::Disposed;
      if let Some(replay) = state.replay.as_mut() {
        replay.clear();
      }
      let subscribers: Vec<_> = state.registry.drain().collect();
      (subscribers, state.gc_timer.take())
    };
    for sub in &subscribers {
      sub.deactivate();
    }
    if let Some(timer) = gc_timer {
      timer.cancel();
    }
    debug!(subject = %self.id, observers = subscribers.len(), "disposed");
    true
  }
}

/// Holds one slot of the concurrency limit for the duration of a round.
struct InFlight<T> {
  inner: Rc<SubjectInner<T>>,
}

impl<T> InFlight<T> {
  fn acquire(inner: &Rc<SubjectInner<T>>) -> Result<Self> {
    let mut state = inner.state.borrow_mut();
    if let Some(limit) = inner.config.concurrency_limit() {
      if state.in_flight >= limit {
        return Err(RxError::ConcurrencyLimit { limit });
      }
    }
    state.in_flight += 1;
    Ok(Self { inner: inner.clone() })
  }
}

impl<T> Drop for InFlight<T> {
  fn drop(&mut self) {
    let mut state = self.inner.state.borrow_mut();
    state.in_flight = state.in_flight.saturating_sub(1);
  }
}

struct Round<T> {
  snapshot: Vec<Rc<Subscriber<T>>>,
  _slot: InFlight<T>,
  started: Instant,
}

/// The publish/subscribe primitive.
///
/// Cloning yields another handle to the same subject. Observers are
/// notified in priority order, ties in registration order; every
/// notification works on a snapshot of the active subscribers, so
/// subscribing or unsubscribing from inside a callback only affects the
/// next notification.
pub struct Subject<T> {
  pub(crate) inner: Rc<SubjectInner<T>>,
}

impl<T> Clone for Subject<T> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<T> fmt::Debug for Subject<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.borrow();
    f.debug_struct("Subject")
      .field("id", &self.inner.id)
      .field("lifecycle", &state.lifecycle)
      .field("observers", &state.registry.len())
      .finish()
  }
}

#[cfg(feature = "tokio-scheduler")]
impl<T: Clone + 'static> Default for Subject<T> {
  fn default() -> Self { Self::new() }
}

#[cfg(feature = "tokio-scheduler")]
impl<T: Clone + 'static> Subject<T> {
  /// A subject with default configuration on the tokio scheduler.
  pub fn new() -> Self { Self::with_config(SubjectConfig::default()) }

  pub fn with_config(config: SubjectConfig<T>) -> Self {
    Self::with_scheduler(config, crate::scheduler::default_scheduler())
  }
}

impl<T> Subject<T> {
  #[inline]
  pub fn id(&self) -> SubjectId { self.inner.id }

  #[inline]
  pub fn config(&self) -> &SubjectConfig<T> { &self.inner.config }

  #[inline]
  pub fn scheduler(&self) -> &SchedulerRef { &self.inner.scheduler }
}

impl<T: Clone + 'static> Subject<T> {
  pub fn with_scheduler(config: SubjectConfig<T>, scheduler: SchedulerRef) -> Self {
    let replay = config.replay.enabled.then(|| ReplayBuffer::new(config.replay.buffer_size));
    let now = scheduler.now();
    let inner = Rc::new(SubjectInner {
      id: SubjectId::next(),
      config,
      scheduler,
      state: RefCell::new(SubjectState {
        lifecycle: Lifecycle::Active,
        errored: false,
        last_error: None,
        registry: Registry::default(),
        replay,
        in_flight: 0,
        metrics: Metrics::default(),
        last_access: now,
        gc_timer: None,
      }),
    });
    if inner.config.memory_management.enabled {
      arm_gc(&inner);
    }
    debug!(subject = %inner.id, "created");
    Self { inner }
  }

  // ==========================================================================
  // Notification
  // ==========================================================================

  /// Deliver `value` to every active observer and wait until all of them
  /// have settled.
  ///
  /// Returns `Ok(true)` when at least one observer took part and none failed
  /// under the `Throw` policy, `Ok(false)` when there were no observers.
  /// With `error_propagation` the first `Throw` failure is returned instead,
  /// after every observer has been attempted.
  pub async fn notify(&self, value: T) -> Result<bool> { self.notify_with(value, |_| {}).await }

  pub(crate) async fn notify_with(&self, value: T, admitted: impl FnOnce(&T)) -> Result<bool> {
    let round = self.begin_round(&value, admitted)?;
    let mut results = Vec::with_capacity(round.snapshot.len());
    let mut pending = Vec::new();
    for sub in &round.snapshot {
      match self.deliver(sub, value.clone()) {
        Step::Done(res) => results.push(res),
        Step::Suspended(fut) => pending.push(fut),
      }
    }
    results.extend(join_all(pending).await);
    self.finish_round(round, &value, results)
  }

  /// Like [`notify`](Self::notify) but never suspends.
  ///
  /// Observers that suspend are spawned on the scheduler; their outcome can
  /// not be reported here and only reaches their own error policy.
  pub fn notify_sync(&self, value: T) -> Result<bool> { self.notify_sync_with(value, |_| {}) }

  pub(crate) fn notify_sync_with(&self, value: T, admitted: impl FnOnce(&T)) -> Result<bool> {
    let round = self.begin_round(&value, admitted)?;
    let mut results = Vec::with_capacity(round.snapshot.len());
    for sub in &round.snapshot {
      match self.deliver(sub, value.clone()) {
        Step::Done(res) => results.push(res),
        step @ Step::Suspended(_) => {
          warn!(subject = %self.inner.id, observer = %sub.id, "observer suspended inside notify_sync, outcome is not observed");
          self.run_detached(sub.id, step);
        }
      }
    }
    self.finish_round(round, &value, results)
  }

  fn begin_round(&self, value: &T, admitted: impl FnOnce(&T)) -> Result<Round<T>> {
    let inner = &self.inner;
    inner.state.borrow().ensure_open()?;
    if let Some(validator) = &inner.config.validation {
      validator(value).map_err(RxError::Validation)?;
    }
    let slot = InFlight::acquire(inner)?;
    admitted(value);
    if let Some(hook) = &inner.config.hooks.before_notify {
      hook(value);
    }

    let started = Instant::now();
    let now = inner.scheduler.now();
    let snapshot = {
      let mut state = inner.state.borrow_mut();
      if let Some(replay) = state.replay.as_mut() {
        replay.push(value.clone());
      }
      state.registry.remove_dead();
      state.last_access = now;
      state.registry.snapshot()
    };
    trace!(subject = %inner.id, observers = snapshot.len(), "notifying");
    Ok(Round { snapshot, _slot: slot, started })
  }

  fn finish_round(&self, round: Round<T>, value: &T, results: Vec<Result<(), RxError>>) -> Result<bool> {
    let Round { snapshot, _slot, started } = round;
    drop(_slot);
    let first_error = results.into_iter().find_map(|res| res.err());
    let success = !snapshot.is_empty() && first_error.is_none();
    let now = self.inner.scheduler.now();
    self.inner.state.borrow_mut().metrics.record_emit(started.elapsed(), now);
    if let Some(hook) = &self.inner.config.hooks.after_notify {
      hook(value, success);
    }
    match first_error {
      Some(err) if self.inner.config.error_propagation => Err(err),
      _ => Ok(success),
    }
  }

  // ==========================================================================
  // Completion and errors
  // ==========================================================================

  /// Complete the subject: pending debounced values fire, then every
  /// observer receives the completion signal. Calling it again is a no-op.
  pub async fn complete(&self) {
    if let Some(subscribers) = self.begin_complete() {
      self.finish_complete(subscribers).await;
    }
  }

  /// Claim the terminal state before any observer runs, so re-entrant and
  /// overlapping calls see the subject as completed. `None` when it already
  /// was completed or disposed.
  pub(crate) fn begin_complete(&self) -> Option<Vec<Rc<Subscriber<T>>>> {
    let subscribers = {
      let mut state = self.inner.state.borrow_mut();
      if state.lifecycle != Lifecycle::Active {
        return None;
      }
      state.lifecycle = Lifecycle::Completed;
      state.registry.snapshot()
    };
    debug!(subject = %self.inner.id, observers = subscribers.len(), "completing");
    Some(subscribers)
  }

  /// Fire pending debounced values, signal completion and tear down.
  pub(crate) async fn finish_complete(&self, subscribers: Vec<Rc<Subscriber<T>>>) {
    let mut pending = Vec::new();
    for sub in &subscribers {
      self.flush_replay(sub);
      if let Some(value) = sub.take_debounced() {
        match self.execute(sub, value) {
          Step::Done(Err(err)) => warn!(subject = %self.inner.id, observer = %sub.id, error = %err, "debounced delivery failed"),
          Step::Done(Ok(())) => {}
          Step::Suspended(fut) => pending.push(fut),
        }
      }
    }
    for res in join_all(pending).await {
      if let Err(err) = res {
        warn!(subject = %self.inner.id, error = %err, "debounced delivery failed");
      }
    }

    let mut completions = Vec::new();
    for sub in &subscribers {
      let Some(observer) = sub.target.upgrade() else { continue };
      let sub = sub.clone();
      let reaction = guarded(|| observer.complete());
      completions.push(async move { (sub, reaction.settle().await) });
    }
    for (sub, res) in join_all(completions).await {
      if let Err(cause) = res {
        if let Err(err) = self.fail(&sub, RxError::Execution { observer: sub.id, cause }, None) {
          warn!(subject = %self.inner.id, observer = %sub.id, error = %err, "completion failed");
        }
      }
    }

    let drained: Vec<_> = self.inner.state.borrow_mut().registry.drain().collect();
    for sub in &drained {
      sub.deactivate();
    }
    if let Some(hook) = &self.inner.config.hooks.on_complete {
      hook();
    }
    if self.inner.config.auto_complete {
      self.inner.dispose();
    }
  }

  /// Signal an error to the observers without terminating the subject.
  ///
  /// `Throw` observers get it through [`Observer::error`], `Callback`
  /// observers through their handler, `Silent` ones are skipped.
  pub async fn error(&self, err: impl Into<CallbackError>) -> Result<()> {
    let err = err.into();
    let subscribers = {
      let mut state = self.inner.state.borrow_mut();
      state.ensure_open()?;
      state.errored = true;
      state.last_error = Some(err.clone());
      state.registry.snapshot()
    };
    debug!(subject = %self.inner.id, error = %err, "error signalled");
    if let Some(hook) = &self.inner.config.hooks.on_error {
      hook(&err);
    }

    let mut pending = Vec::new();
    for sub in &subscribers {
      match &sub.options.error_handling {
        ErrorHandling::Silent => {}
        ErrorHandling::Callback(handler) => {
          let signalled = RxError::Signalled(err.clone());
          if catch_unwind(AssertUnwindSafe(|| handler(&signalled, None, self))).is_err() {
            warn!(subject = %self.inner.id, observer = %sub.id, "error handler panicked");
          }
        }
        ErrorHandling::Throw => {
          let Some(observer) = sub.target.upgrade() else { continue };
          let id = sub.id;
          let reaction = guarded(|| observer.error(&err));
          pending.push(async move { (id, reaction.settle().await) });
        }
      }
    }
    for (observer, res) in join_all(pending).await {
      if let Err(cause) = res {
        warn!(subject = %self.inner.id, %observer, error = %cause, "observer failed to handle error");
      }
    }
    Ok(())
  }

  // ==========================================================================
  // Registration
  // ==========================================================================

  /// Register a closure. It may return `()`, a `Result<(), CallbackError>`
  /// or a [`Reaction`].
  pub fn add_observer<F, R>(&self, f: F, options: ObserverOptions<T>) -> Result<SubjectSubscription<T>>
  where
    F: Fn(T) -> R + 'static,
    R: Into<Reaction> + 'static,
  {
    self.add_observer_with(FnObserver::new(f), options)
  }

  /// Register an observer the subject owns.
  pub fn add_observer_with<O>(&self, observer: O, options: ObserverOptions<T>) -> Result<SubjectSubscription<T>>
  where
    O: Observer<T> + 'static,
  {
    self.register(ObserverRef::Strong(Rc::new(observer)), None, options, Vec::new())
  }

  /// Register a shared observer, which can later be removed with
  /// [`remove_observer`](Self::remove_observer).
  ///
  /// It is held weakly when the options ask for a weak reference or the
  /// subject is configured with `weak_references`; once the caller drops the
  /// last `Rc` the subscriber is treated as gone.
  pub fn add_shared_observer<O>(&self, observer: &Rc<O>, options: ObserverOptions<T>) -> Result<SubjectSubscription<T>>
  where
    O: Observer<T> + 'static,
  {
    let target = self.shared_target(observer, &options);
    self.register(target, Some(identity_of(observer)), options, Vec::new())
  }

  pub(crate) fn shared_target<O>(&self, observer: &Rc<O>, options: &ObserverOptions<T>) -> ObserverRef<T>
  where
    O: Observer<T> + 'static,
  {
    if options.weak_reference || self.inner.config.memory_management.weak_references {
      ObserverRef::Weak(Rc::downgrade(observer) as std::rc::Weak<dyn Observer<T>>)
    } else {
      ObserverRef::Strong(observer.clone())
    }
  }

  /// Common registration path. `seed` is delivered after any replay history.
  pub(crate) fn register(
    &self, target: ObserverRef<T>, identity: Option<usize>, options: ObserverOptions<T>, seed: Vec<T>,
  ) -> Result<SubjectSubscription<T>> {
    let inner = &self.inner;
    let now = inner.scheduler.now();
    let subscriber = {
      let mut state = inner.state.borrow_mut();
      state.ensure_open()?;
      state.registry.remove_dead();
      let max = inner.config.max_observers;
      if state.registry.len() >= max {
        return Err(RxError::MaxObserversExceeded { max });
      }

      let mut backlog: std::collections::VecDeque<T> = match (&state.replay, options.replay) {
        (Some(replay), true) => replay.iter().cloned().collect(),
        _ => Default::default(),
      };
      backlog.extend(seed);

      let subscriber = Rc::new(Subscriber::new(target, identity, options, now));
      if !backlog.is_empty() {
        subscriber.state.borrow_mut().pending_replay = Some(backlog);
      }
      state.registry.add(subscriber.clone());
      state.last_access = now;
      subscriber
    };
    trace!(subject = %inner.id, observer = %subscriber.id, priority = ?subscriber.options.priority, "observer added");

    if subscriber.state.borrow().pending_replay.is_some() {
      let subject = Rc::downgrade(inner);
      let record = Rc::downgrade(&subscriber);
      inner.scheduler.schedule(
        None,
        Box::new(move || {
          if let (Some(inner), Some(sub)) = (subject.upgrade(), record.upgrade()) {
            Subject { inner }.flush_replay(&sub);
          }
        }),
      );
    }
    Ok(SubjectSubscription::new(Rc::downgrade(inner), subscriber.id))
  }

  /// Remove a shared observer registered with
  /// [`add_shared_observer`](Self::add_shared_observer).
  pub fn remove_observer<O: ?Sized>(&self, observer: &Rc<O>) -> bool {
    let found = self.inner.state.borrow().registry.find_by_identity(identity_of(observer));
    found.is_some_and(|id| self.inner.remove_subscriber(id))
  }

  pub fn remove_observer_by_id(&self, id: ObserverId) -> bool { self.inner.remove_subscriber(id) }

  pub fn has_observer<O: ?Sized>(&self, observer: &Rc<O>) -> bool {
    self.inner.state.borrow().registry.find_by_identity(identity_of(observer)).is_some()
  }

  pub fn has_observer_id(&self, id: ObserverId) -> bool { self.inner.state.borrow().registry.contains(id) }

  // ==========================================================================
  // State and diagnostics
  // ==========================================================================

  pub fn observer_count(&self) -> usize { self.inner.observer_count() }

  pub fn lifecycle(&self) -> Lifecycle { self.inner.lifecycle() }

  pub fn is_completed(&self) -> bool { self.lifecycle() == Lifecycle::Completed }

  pub fn is_disposed(&self) -> bool { self.lifecycle() == Lifecycle::Disposed }

  /// Whether `error()` has been called at least once.
  pub fn is_errored(&self) -> bool { self.inner.state.borrow().errored }

  pub fn last_error(&self) -> Option<CallbackError> { self.inner.state.borrow().last_error.clone() }

  /// Tear the subject down: observers are dropped, pending debounced values
  /// cancelled and the replay history cleared. Rounds already running are
  /// not interrupted. Idempotent.
  pub fn dispose(&self) { self.inner.dispose(); }

  pub fn memory_usage(&self) -> MemoryUsage { self.inner.memory_usage() }

  pub fn metrics(&self) -> Metrics { self.inner.state.borrow().metrics.clone() }

  /// The replay history, oldest first. Empty when replay is disabled.
  pub fn replay_buffer(&self) -> Vec<T> {
    self.inner.state.borrow().replay.as_ref().map(ReplayBuffer::to_vec).unwrap_or_default()
  }

  /// Values kept for an observer registered with `buffering(n)`.
  pub fn buffered_values(&self, id: ObserverId) -> Option<Vec<T>> {
    self.inner.state.borrow().registry.find(id).map(|sub| sub.buffered())
  }

  /// How many times the observer has been invoked.
  pub fn execution_count(&self, id: ObserverId) -> Option<u64> {
    self.inner.state.borrow().registry.find(id).map(|sub| sub.execution_count())
  }

  pub fn observer_activity(&self, id: ObserverId) -> Option<ObserverActivity> {
    self.inner.state.borrow().registry.find(id).map(|sub| sub.activity())
  }

  /// Drop observers whose weak referent is gone. Returns how many.
  pub fn collect_dead_observers(&self) -> usize { self.inner.collect_dead_observers() }

  /// Scheduler time since the subject was last used.
  pub fn idle_for(&self) -> Duration { self.inner.idle_for() }
}

fn arm_gc<T: 'static>(inner: &Rc<SubjectInner<T>>) {
  let weak = Rc::downgrade(inner);
  let interval = inner.config.memory_management.gc_interval;
  let timer = inner.scheduler.schedule(
    Some(interval),
    Box::new(move || {
      let Some(inner) = weak.upgrade() else { return };
      if inner.lifecycle() == Lifecycle::Disposed {
        return;
      }
      inner.collect_dead_observers();
      arm_gc(&inner);
    }),
  );
  inner.state.borrow_mut().gc_timer = Some(timer);
}
