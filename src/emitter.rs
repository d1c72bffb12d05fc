//! Priority event emitter: named events, pausable bounded queues.
//!
//! Listeners are registered per string key and fire in priority order,
//! ties in registration order. While paused, emits are queued per key up to
//! `buffer_size`; a full queue is a hard [`RxError::EventQueueFull`]. On
//! [`resume`](EventEmitter::resume) every queue is drained in one global
//! order: priority first, then the time the event was queued.
//!
//! Listener failures never abort sibling listeners. If handlers are
//! registered on the synthetic [`ERROR_EVENT`] key the failures go there,
//! otherwise the first one is returned to the emitter's caller.

mod queue;
mod work;

use std::{
  cell::RefCell,
  collections::HashMap,
  mem,
  panic::{catch_unwind, AssertUnwindSafe},
  rc::Rc,
  time::{Duration, Instant},
};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

pub use queue::QueuedEvent;
use queue::EventQueue;
use work::WorkQueue;

use crate::{
  error::{CallbackError, Result, RxError},
  id::{EventId, ListenerId},
  metrics::{Metrics, Timed},
  observer::{guarded, Reaction},
  scheduler::SchedulerRef,
  subject::Priority,
};

/// Key of the synthetic error event.
pub const ERROR_EVENT: &str = "error";

pub const DEFAULT_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_MAX_LISTENERS: usize = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Emitter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterConfig {
  /// Capacity of each per-key pause queue.
  pub buffer_size: usize,
  /// Listeners allowed per key.
  pub max_listeners: usize,
  /// Suspended listeners fired by `emit_sync` that may run at once.
  pub max_concurrency: usize,
}

impl Default for EmitterConfig {
  fn default() -> Self {
    Self {
      buffer_size: DEFAULT_BUFFER_SIZE,
      max_listeners: DEFAULT_MAX_LISTENERS,
      max_concurrency: DEFAULT_MAX_CONCURRENCY,
    }
  }
}

impl EmitterConfig {
  pub fn builder() -> EmitterConfigBuilder { EmitterConfigBuilder::default() }
}

/// Builder for [`EmitterConfig`].
#[derive(Debug, Default)]
pub struct EmitterConfigBuilder {
  buffer_size: Option<usize>,
  max_listeners: Option<usize>,
  max_concurrency: Option<usize>,
}

impl EmitterConfigBuilder {
  #[must_use]
  pub fn buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = Some(size);
    self
  }

  #[must_use]
  pub fn max_listeners(mut self, max: usize) -> Self {
    self.max_listeners = Some(max);
    self
  }

  #[must_use]
  pub fn max_concurrency(mut self, max: usize) -> Self {
    self.max_concurrency = Some(max);
    self
  }

  #[must_use]
  pub fn build(self) -> EmitterConfig {
    EmitterConfig {
      buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
      max_listeners: self.max_listeners.unwrap_or(DEFAULT_MAX_LISTENERS),
      max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
  pub priority: Priority,
  pub once: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitOptions {
  /// Queue priority while the emitter is paused.
  pub priority: Priority,
}

/// What happened to an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
  /// Dispatched to this many listeners.
  Delivered(usize),
  /// Held in the pause queue.
  Queued,
}

type ListenerFn<P> = Rc<dyn Fn(P) -> Reaction>;
type ErrorListenerFn = Rc<dyn Fn(&RxError)>;

struct Listener<P> {
  id: ListenerId,
  options: ListenerOptions,
  callback: ListenerFn<P>,
}

struct EventSlot<P> {
  listeners: SmallVec<[Rc<Listener<P>>; 4]>,
  queue: EventQueue<P>,
  metrics: Metrics,
}

impl<P> EventSlot<P> {
  fn new(capacity: usize) -> Self {
    Self { listeners: SmallVec::new(), queue: EventQueue::new(capacity), metrics: Metrics::default() }
  }

  /// Active listeners by priority. `once` listeners leave the slot here, so
  /// they fire for this round only.
  fn take_round(&mut self) -> Vec<Rc<Listener<P>>> {
    let mut round: Vec<_> = self.listeners.to_vec();
    self.listeners.retain(|l| !l.options.once);
    round.sort_by_key(|l| l.options.priority);
    round
  }
}

struct EmitterState<P> {
  events: HashMap<String, EventSlot<P>>,
  error_listeners: Vec<(ListenerId, ErrorListenerFn)>,
  paused: bool,
  disposed: bool,
}

struct EmitterInner<P> {
  config: EmitterConfig,
  scheduler: SchedulerRef,
  work: WorkQueue,
  state: RefCell<EmitterState<P>>,
}

/// A named-event multiplexer with priorities and pause/resume queues.
///
/// Cloning yields another handle to the same emitter.
pub struct EventEmitter<P> {
  inner: Rc<EmitterInner<P>>,
}

impl<P> Clone for EventEmitter<P> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

enum Admission<P> {
  Dispatch(P, Vec<Rc<Listener<P>>>),
  Queued,
}

#[cfg(feature = "tokio-scheduler")]
impl<P: Clone + 'static> Default for EventEmitter<P> {
  fn default() -> Self { Self::new() }
}

#[cfg(feature = "tokio-scheduler")]
impl<P: Clone + 'static> EventEmitter<P> {
  pub fn new() -> Self { Self::with_config(EmitterConfig::default()) }

  pub fn with_config(config: EmitterConfig) -> Self {
    Self::with_scheduler(config, crate::scheduler::default_scheduler())
  }
}

impl<P: Clone + 'static> EventEmitter<P> {
  pub fn with_scheduler(config: EmitterConfig, scheduler: SchedulerRef) -> Self {
    let work = WorkQueue::new(config.max_concurrency, scheduler.clone());
    Self {
      inner: Rc::new(EmitterInner {
        config,
        scheduler,
        work,
        state: RefCell::new(EmitterState {
          events: HashMap::new(),
          error_listeners: Vec::new(),
          paused: false,
          disposed: false,
        }),
      }),
    }
  }

  pub fn config(&self) -> &EmitterConfig { &self.inner.config }

  // ==========================================================================
  // Listeners
  // ==========================================================================

  pub fn on<F, R>(&self, event: &str, listener: F) -> Result<ListenerId>
  where
    F: Fn(P) -> R + 'static,
    R: Into<Reaction>,
  {
    self.on_with(event, listener, ListenerOptions::default())
  }

  /// Register a listener that fires for the next emit of `event` only.
  pub fn once<F, R>(&self, event: &str, listener: F) -> Result<ListenerId>
  where
    F: Fn(P) -> R + 'static,
    R: Into<Reaction>,
  {
    self.on_with(event, listener, ListenerOptions { once: true, ..Default::default() })
  }

  pub fn on_with<F, R>(&self, event: &str, listener: F, options: ListenerOptions) -> Result<ListenerId>
  where
    F: Fn(P) -> R + 'static,
    R: Into<Reaction>,
  {
    if event == ERROR_EVENT {
      return Err(RxError::Validation(format!("`{ERROR_EVENT}` listeners are registered with on_error")));
    }
    let mut state = self.inner.state.borrow_mut();
    if state.disposed {
      return Err(RxError::Disposed);
    }
    let capacity = self.inner.config.buffer_size;
    let slot = state.events.entry(event.to_owned()).or_insert_with(|| EventSlot::new(capacity));
    let max = self.inner.config.max_listeners;
    if slot.listeners.len() >= max {
      return Err(RxError::MaxObserversExceeded { max });
    }
    let id = ListenerId::next();
    let callback: ListenerFn<P> = Rc::new(move |payload: P| -> Reaction { listener(payload).into() });
    slot.listeners.push(Rc::new(Listener { id, options, callback }));
    trace!(%event, listener = %id, priority = ?options.priority, "listener added");
    Ok(id)
  }

  /// Register a handler on the synthetic [`ERROR_EVENT`] key. Listener
  /// failures are routed to these handlers instead of the emit caller.
  pub fn on_error(&self, handler: impl Fn(&RxError) + 'static) -> Result<ListenerId> {
    let mut state = self.inner.state.borrow_mut();
    if state.disposed {
      return Err(RxError::Disposed);
    }
    let id = ListenerId::next();
    state.error_listeners.push((id, Rc::new(handler)));
    Ok(id)
  }

  pub fn off(&self, event: &str, id: ListenerId) -> bool {
    let mut state = self.inner.state.borrow_mut();
    if event == ERROR_EVENT {
      let before = state.error_listeners.len();
      state.error_listeners.retain(|(lid, _)| *lid != id);
      return state.error_listeners.len() != before;
    }
    let Some(slot) = state.events.get_mut(event) else { return false };
    let before = slot.listeners.len();
    slot.listeners.retain(|l| l.id != id);
    slot.listeners.len() != before
  }

  /// Remove a listener without knowing its event key.
  pub fn off_by_id(&self, id: ListenerId) -> bool {
    let event = {
      let state = self.inner.state.borrow();
      if state.error_listeners.iter().any(|(lid, _)| *lid == id) {
        Some(ERROR_EVENT.to_owned())
      } else {
        state
          .events
          .iter()
          .find(|(_, slot)| slot.listeners.iter().any(|l| l.id == id))
          .map(|(event, _)| event.clone())
      }
    };
    event.is_some_and(|event| self.off(&event, id))
  }

  pub fn listener_count(&self, event: &str) -> usize {
    let state = self.inner.state.borrow();
    if event == ERROR_EVENT {
      return state.error_listeners.len();
    }
    state.events.get(event).map_or(0, |slot| slot.listeners.len())
  }

  /// Keys with at least one listener, sorted.
  pub fn event_names(&self) -> Vec<String> {
    let state = self.inner.state.borrow();
    let mut names: Vec<_> = state
      .events
      .iter()
      .filter(|(_, slot)| !slot.listeners.is_empty())
      .map(|(event, _)| event.clone())
      .collect();
    if !state.error_listeners.is_empty() {
      names.push(ERROR_EVENT.to_owned());
    }
    names.sort();
    names
  }

  // ==========================================================================
  // Emitting
  // ==========================================================================

  /// Dispatch `payload` to the listeners of `event`, awaiting each in turn.
  pub async fn emit(&self, event: &str, payload: P) -> Result<Emitted> {
    self.emit_with(event, payload, EmitOptions::default()).await
  }

  pub async fn emit_with(&self, event: &str, payload: P, options: EmitOptions) -> Result<Emitted> {
    let (payload, listeners) = match self.admit(event, payload, options.priority)? {
      Admission::Queued => return Ok(Emitted::Queued),
      Admission::Dispatch(payload, listeners) => (payload, listeners),
    };
    let started = Instant::now();
    let mut failures = Vec::new();
    for listener in &listeners {
      let call = Timed::new(async { guarded(|| (listener.callback)(payload.clone())).settle().await });
      let (res, elapsed) = call.await;
      if let Err(failure) = self.record_execution(event, listener.id, elapsed, res) {
        failures.push(failure);
      }
    }
    self.record_emit(event, started);
    self.route_failures(failures)?;
    Ok(Emitted::Delivered(listeners.len()))
  }

  /// Dispatch without suspending. Listeners that suspend continue on the
  /// emitter's bounded work queue; their failures go to the error handlers
  /// (or the log) when they finish.
  pub fn emit_sync(&self, event: &str, payload: P) -> Result<Emitted> {
    self.emit_sync_with(event, payload, EmitOptions::default())
  }

  pub fn emit_sync_with(&self, event: &str, payload: P, options: EmitOptions) -> Result<Emitted> {
    match self.admit(event, payload, options.priority)? {
      Admission::Queued => Ok(Emitted::Queued),
      Admission::Dispatch(payload, listeners) => {
        let delivered = listeners.len();
        self.dispatch_sync(event, payload, listeners)?;
        Ok(Emitted::Delivered(delivered))
      }
    }
  }

  /// Emit several events in order. Every event is attempted; the results
  /// line up with the input.
  pub async fn emit_batch<I, K>(&self, events: I) -> Vec<Result<Emitted>>
  where
    I: IntoIterator<Item = (K, P)>,
    K: AsRef<str>,
  {
    let mut results = Vec::new();
    for (event, payload) in events {
      results.push(self.emit(event.as_ref(), payload).await);
    }
    results
  }

  fn admit(&self, event: &str, payload: P, priority: Priority) -> Result<Admission<P>> {
    let now = self.inner.scheduler.now();
    let mut state = self.inner.state.borrow_mut();
    if state.disposed {
      return Err(RxError::Disposed);
    }
    let capacity = self.inner.config.buffer_size;
    if state.paused {
      let slot = state.events.entry(event.to_owned()).or_insert_with(|| EventSlot::new(capacity));
      let queued = QueuedEvent { id: EventId::next(), event: event.to_owned(), payload, priority, enqueued_at: now };
      if slot.queue.push(queued).is_err() {
        return Err(RxError::EventQueueFull { event: event.to_owned(), capacity: slot.queue.capacity() });
      }
      trace!(%event, queued = slot.queue.len(), "queued while paused");
      return Ok(Admission::Queued);
    }
    let listeners = state.events.get_mut(event).map(EventSlot::take_round).unwrap_or_default();
    Ok(Admission::Dispatch(payload, listeners))
  }

  fn dispatch_sync(&self, event: &str, payload: P, listeners: Vec<Rc<Listener<P>>>) -> Result<()> {
    let started = Instant::now();
    let mut failures = Vec::new();
    for listener in &listeners {
      let call_started = Instant::now();
      match guarded(|| (listener.callback)(payload.clone())) {
        Reaction::Settled(res) => {
          if let Err(failure) = self.record_execution(event, listener.id, call_started.elapsed(), res) {
            failures.push(failure);
          }
        }
        Reaction::Suspended(fut) => {
          let emitter = self.clone();
          let event = event.to_owned();
          let id = listener.id;
          self.inner.work.submit(Box::pin(async move {
            let (res, elapsed) = Timed::new(fut).await;
            if let Err(failure) = emitter.record_execution(&event, id, elapsed, res) {
              if let Err(err) = emitter.route_failures(vec![failure]) {
                warn!(%event, listener = %id, error = %err, "unobserved listener failure");
              }
            }
          }));
        }
      }
    }
    self.record_emit(event, started);
    self.route_failures(failures)
  }

  fn record_execution(
    &self, event: &str, listener: ListenerId, elapsed: Duration, res: Result<(), CallbackError>,
  ) -> Result<()> {
    if let Some(slot) = self.inner.state.borrow_mut().events.get_mut(event) {
      slot.metrics.record_execution(elapsed);
      if res.is_ok() {
        slot.metrics.record_success();
      } else {
        slot.metrics.record_error();
      }
    }
    res.map_err(|cause| RxError::Listener { event: event.to_owned(), listener, cause })
  }

  fn record_emit(&self, event: &str, started: Instant) {
    let now = self.inner.scheduler.now();
    if let Some(slot) = self.inner.state.borrow_mut().events.get_mut(event) {
      slot.metrics.record_emit(started.elapsed(), now);
    }
  }

  /// Hand failures to the error handlers; without handlers the first one is
  /// returned.
  fn route_failures(&self, failures: Vec<RxError>) -> Result<()> {
    if failures.is_empty() {
      return Ok(());
    }
    let handlers: Vec<_> = self.inner.state.borrow().error_listeners.iter().map(|(_, h)| h.clone()).collect();
    let mut failures = failures.into_iter();
    if handlers.is_empty() {
      return failures.next().map_or(Ok(()), Err);
    }
    for failure in failures {
      for handler in &handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(&failure))).is_err() {
          warn!(error = %failure, "error listener panicked");
        }
      }
    }
    Ok(())
  }

  // ==========================================================================
  // Pause, resume and draining
  // ==========================================================================

  pub fn pause(&self) {
    self.inner.state.borrow_mut().paused = true;
    debug!("emitter paused");
  }

  pub fn is_paused(&self) -> bool { self.inner.state.borrow().paused }

  pub fn queued_len(&self, event: &str) -> usize {
    self.inner.state.borrow().events.get(event).map_or(0, |slot| slot.queue.len())
  }

  /// Suspended listeners from `emit_sync` that are running or waiting for a
  /// concurrency slot.
  pub fn pending_work(&self) -> usize { self.inner.work.outstanding() }

  /// Unpause and deliver every queued event, across all keys, by priority
  /// and then queue time. Returns how many events were delivered.
  pub fn resume(&self) -> Result<usize> {
    self.inner.state.borrow_mut().paused = false;
    let delivered = self.flush_queued(None)?;
    debug!(delivered, "emitter resumed");
    Ok(delivered)
  }

  /// Deliver the queued events of `event` now, even while paused.
  pub fn flush(&self, event: &str) -> Result<usize> { self.flush_queued(Some(event)) }

  /// Wait for suspended listeners started by `emit_sync`, then deliver
  /// anything still queued unless the emitter is paused.
  pub async fn drain(&self) -> Result<usize> {
    self.inner.work.idle().await;
    if self.is_paused() {
      return Ok(0);
    }
    self.flush_queued(None)
  }

  fn flush_queued(&self, only: Option<&str>) -> Result<usize> {
    let mut queued: Vec<QueuedEvent<P>> = {
      let mut state = self.inner.state.borrow_mut();
      if state.disposed {
        return Err(RxError::Disposed);
      }
      state
        .events
        .iter_mut()
        .filter(|(event, _)| only.map_or(true, |only| only == event.as_str()))
        .flat_map(|(_, slot)| slot.queue.take_all())
        .collect()
    };
    queued.sort_by_key(QueuedEvent::order_key);

    let delivered = queued.len();
    let mut first_error = None;
    for QueuedEvent { event, payload, .. } in queued {
      let listeners = {
        let mut state = self.inner.state.borrow_mut();
        state.events.get_mut(&event).map(EventSlot::take_round).unwrap_or_default()
      };
      if let Err(err) = self.dispatch_sync(&event, payload, listeners) {
        first_error.get_or_insert(err);
      }
    }
    first_error.map_or(Ok(delivered), Err)
  }

  // ==========================================================================
  // Diagnostics and teardown
  // ==========================================================================

  pub fn get_metrics(&self, event: &str) -> Option<Metrics> {
    self.inner.state.borrow().events.get(event).map(|slot| slot.metrics.clone())
  }

  /// Drop every listener and queued event. Later emits and registrations
  /// fail with [`RxError::Disposed`].
  pub fn dispose(&self) {
    let released = {
      let mut state = self.inner.state.borrow_mut();
      if state.disposed {
        return;
      }
      state.disposed = true;
      state.paused = false;
      (mem::take(&mut state.events), mem::take(&mut state.error_listeners))
    };
    drop(released);
    debug!("emitter disposed");
  }

  pub fn is_disposed(&self) -> bool { self.inner.state.borrow().disposed }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};

  use super::*;
  use crate::scheduler::TestScheduler;

  fn emitter(config: EmitterConfig) -> EventEmitter<u32> {
    TestScheduler::init();
    EventEmitter::with_scheduler(config, Rc::new(TestScheduler))
  }

  fn log() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(u32)>) {
    let log = Rc::new(RefCell::new(vec![]));
    let l = log.clone();
    let make = move |name: &str| -> Box<dyn Fn(u32)> {
      let (l, name) = (l.clone(), name.to_owned());
      Box::new(move |v| l.borrow_mut().push(format!("{name}:{v}")))
    };
    (log, make)
  }

  #[rxnotify_macro::test]
  async fn listeners_fire_by_priority() {
    let emitter = emitter(EmitterConfig::default());
    let (log, make) = log();
    for (name, priority) in [("low", Priority::Low), ("high", Priority::High), ("normal", Priority::Normal)] {
      emitter.on_with("tick", make(name), ListenerOptions { priority, once: false }).unwrap();
    }
    assert_eq!(emitter.emit("tick", 1).await.unwrap(), Emitted::Delivered(3));
    assert_eq!(*log.borrow(), vec!["high:1", "normal:1", "low:1"]);
    assert_eq!(emitter.emit("nobody", 1).await.unwrap(), Emitted::Delivered(0));
  }

  #[rxnotify_macro::test]
  fn once_listeners_fire_a_single_time() {
    let emitter = emitter(EmitterConfig::default());
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    emitter.once("tick", move |_| c.set(c.get() + 1)).unwrap();
    emitter.emit_sync("tick", 1).unwrap();
    emitter.emit_sync("tick", 2).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(emitter.listener_count("tick"), 0);
  }

  #[rxnotify_macro::test]
  fn listeners_added_during_dispatch_wait_for_the_next_emit() {
    let emitter = emitter(EmitterConfig::default());
    let calls = Rc::new(Cell::new(0));
    let (e, c) = (emitter.clone(), calls.clone());
    emitter
      .once("tick", move |_| {
        let c = c.clone();
        e.on("tick", move |_| c.set(c.get() + 1)).unwrap();
      })
      .unwrap();
    emitter.emit_sync("tick", 1).unwrap();
    assert_eq!(calls.get(), 0);
    emitter.emit_sync("tick", 2).unwrap();
    assert_eq!(calls.get(), 1);
  }

  #[rxnotify_macro::test]
  fn paused_emits_queue_until_capacity() {
    let emitter = emitter(EmitterConfig::builder().buffer_size(2).build());
    emitter.on("tick", |_| ()).unwrap();
    emitter.pause();
    assert_eq!(emitter.emit_sync("tick", 1).unwrap(), Emitted::Queued);
    assert_eq!(emitter.emit_sync("tick", 2).unwrap(), Emitted::Queued);
    let err = emitter.emit_sync("tick", 3).unwrap_err();
    assert!(matches!(err, RxError::EventQueueFull { ref event, capacity: 2 } if event == "tick"));
    assert_eq!(emitter.queued_len("tick"), 2);
  }

  #[rxnotify_macro::test]
  fn resume_interleaves_keys_by_priority_then_time() {
    let emitter = emitter(EmitterConfig::default());
    let (log, make) = log();
    emitter.on("a", make("a")).unwrap();
    emitter.on("b", make("b")).unwrap();
    emitter.pause();
    emitter.emit_sync("a", 1).unwrap();
    TestScheduler::advance_by(std::time::Duration::from_millis(1));
    emitter.emit_sync("b", 2).unwrap();
    TestScheduler::advance_by(std::time::Duration::from_millis(1));
    emitter.emit_sync_with("a", 3, EmitOptions { priority: Priority::High }).unwrap();
    emitter.emit_sync_with("b", 4, EmitOptions { priority: Priority::Low }).unwrap();
    assert!(log.borrow().is_empty());

    assert_eq!(emitter.resume().unwrap(), 4);
    assert!(!emitter.is_paused());
    assert_eq!(*log.borrow(), vec!["a:3", "a:1", "b:2", "b:4"]);
  }

  #[rxnotify_macro::test]
  fn flush_delivers_one_key_while_paused() {
    let emitter = emitter(EmitterConfig::default());
    let (log, make) = log();
    emitter.on("a", make("a")).unwrap();
    emitter.on("b", make("b")).unwrap();
    emitter.pause();
    emitter.emit_sync("a", 1).unwrap();
    emitter.emit_sync("b", 2).unwrap();
    assert_eq!(emitter.flush("a").unwrap(), 1);
    assert_eq!(*log.borrow(), vec!["a:1"]);
    assert_eq!(emitter.queued_len("b"), 1);
  }

  #[rxnotify_macro::test]
  async fn failures_go_to_error_listeners_when_present() {
    let emitter = emitter(EmitterConfig::default());
    let ok_calls = Rc::new(Cell::new(0));
    let c = ok_calls.clone();
    emitter.on("tick", |_| -> std::result::Result<(), CallbackError> { Err(CallbackError::msg("bad tick")) }).unwrap();
    emitter.on("tick", move |_| c.set(c.get() + 1)).unwrap();

    let err = emitter.emit("tick", 1).await.unwrap_err();
    assert!(matches!(err, RxError::Listener { ref event, .. } if event == "tick"));
    assert_eq!(ok_calls.get(), 1);

    let routed = Rc::new(RefCell::new(vec![]));
    let r = routed.clone();
    let handler = emitter.on_error(move |err| r.borrow_mut().push(err.to_string())).unwrap();
    assert_eq!(emitter.listener_count(ERROR_EVENT), 1);
    assert!(emitter.emit("tick", 2).await.is_ok());
    assert_eq!(routed.borrow().len(), 1);
    assert!(routed.borrow()[0].contains("bad tick"));
    assert_eq!(ok_calls.get(), 2);

    assert!(emitter.off_by_id(handler));
    assert!(emitter.emit("tick", 3).await.is_err());
  }

  #[rxnotify_macro::test]
  fn error_key_is_reserved_for_error_listeners() {
    let emitter = emitter(EmitterConfig::default());
    assert!(matches!(emitter.on(ERROR_EVENT, |_| ()), Err(RxError::Validation(_))));
  }

  #[rxnotify_macro::test]
  fn max_listeners_per_key() {
    let emitter = emitter(EmitterConfig::builder().max_listeners(1).build());
    emitter.on("tick", |_| ()).unwrap();
    assert!(matches!(emitter.on("tick", |_| ()), Err(RxError::MaxObserversExceeded { max: 1 })));
    emitter.on("tock", |_| ()).unwrap();
    assert_eq!(emitter.event_names(), vec!["tick".to_string(), "tock".to_string()]);
  }

  #[rxnotify_macro::test]
  fn off_removes_only_the_given_listener() {
    let emitter = emitter(EmitterConfig::default());
    let a = emitter.on("tick", |_| ()).unwrap();
    emitter.on("tick", |_| ()).unwrap();
    assert!(emitter.off("tick", a));
    assert!(!emitter.off("tick", a));
    assert!(!emitter.off_by_id(a));
    assert_eq!(emitter.listener_count("tick"), 1);
  }

  #[rxnotify_macro::test]
  async fn batch_attempts_every_event() {
    let emitter = emitter(EmitterConfig::default());
    let (log, make) = log();
    emitter.on("a", make("a")).unwrap();
    let results = emitter.emit_batch([("a", 1), ("b", 2), ("a", 3)]).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(*log.borrow(), vec!["a:1", "a:3"]);
  }

  #[rxnotify_macro::test]
  async fn drain_waits_for_suspended_listeners() {
    let emitter = emitter(EmitterConfig::default());
    let done = Rc::new(Cell::new(0));
    let d = done.clone();
    emitter
      .on("tick", move |_| {
        let d = d.clone();
        Reaction::suspend(async move {
          d.set(d.get() + 1);
          Ok(())
        })
      })
      .unwrap();
    emitter.emit_sync("tick", 1).unwrap();
    emitter.emit_sync("tick", 2).unwrap();
    // the test scheduler polls spawned work right away
    assert_eq!(emitter.pending_work(), 0);
    assert_eq!(emitter.drain().await.unwrap(), 0);
    assert_eq!(done.get(), 2);
  }

  #[rxnotify_macro::test]
  async fn metrics_and_dispose() {
    let emitter = emitter(EmitterConfig::default());
    emitter.on("tick", |_| ()).unwrap();
    emitter.emit("tick", 1).await.unwrap();
    emitter.emit_sync("tick", 2).unwrap();
    let metrics = emitter.get_metrics("tick").unwrap();
    assert_eq!(metrics.emit_count, 2);
    assert_eq!(metrics.execution_count, 2);
    assert_eq!(metrics.error_count, 0);

    emitter.dispose();
    assert!(emitter.is_disposed());
    assert!(matches!(emitter.emit_sync("tick", 3), Err(RxError::Disposed)));
    assert!(matches!(emitter.on("tick", |_| ()), Err(RxError::Disposed)));
    assert!(emitter.get_metrics("tick").is_none());
  }
}
